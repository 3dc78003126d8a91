use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::client::{
    HelpCenterReadApi, HelpCenterWriteApi, NewArticle, NewCategory, NewSection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyPhase {
    Categories,
    Sections,
    Articles,
}

impl CopyPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Sections => "sections",
            Self::Articles => "articles",
        }
    }
}

/// Discrete progress notifications emitted while a copy run executes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum CopyEvent {
    PhaseStarted {
        phase: CopyPhase,
    },
    Created {
        phase: CopyPhase,
        source_id: u64,
        dest_id: u64,
        name: String,
    },
    Skipped {
        phase: CopyPhase,
        source_id: u64,
        name: String,
        reason: String,
    },
    Failed {
        phase: CopyPhase,
        source_id: u64,
        name: String,
        error: String,
    },
    ListingFailed {
        phase: CopyPhase,
        parent_id: Option<u64>,
        error: String,
    },
}

pub trait CopyProgress {
    fn on_event(&mut self, event: &CopyEvent);
}

/// Observer that discards every event.
pub struct NullProgress;

impl CopyProgress for NullProgress {
    fn on_event(&mut self, _event: &CopyEvent) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub found: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Full request payload of the first article the destination rejected,
/// kept for diagnostics; later failures are recorded tersely.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleFailure {
    pub source_article_id: u64,
    pub title: String,
    pub destination_section_id: u64,
    pub payload: Value,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    /// False only when a phase aborted outright (no destination permission
    /// groups); per-record failures leave this true and are counted below.
    pub success: bool,
    pub categories: LevelSummary,
    pub sections: LevelSummary,
    pub articles: LevelSummary,
    pub category_map: BTreeMap<u64, u64>,
    pub section_map: BTreeMap<u64, u64>,
    pub article_map: BTreeMap<u64, u64>,
    pub errors: Vec<String>,
    pub first_article_failure: Option<ArticleFailure>,
    pub source_requests: usize,
    pub dest_requests: usize,
}

impl CopyReport {
    fn empty() -> Self {
        Self {
            success: true,
            categories: LevelSummary::default(),
            sections: LevelSummary::default(),
            articles: LevelSummary::default(),
            category_map: BTreeMap::new(),
            section_map: BTreeMap::new(),
            article_map: BTreeMap::new(),
            errors: Vec::new(),
            first_article_failure: None,
            source_requests: 0,
            dest_requests: 0,
        }
    }
}

/// Drives one source-to-destination copy run in three sequential phases:
/// categories, then sections, then articles. A phase never starts until the
/// previous phase has finished populating its ID map, because any child may
/// reference any parent. The maps translate source-assigned identifiers to
/// destination-assigned ones, are written once per source id, and live only
/// for the duration of the run.
pub struct HelpCenterCopier<'a, S, D, P> {
    source: &'a mut S,
    dest: &'a mut D,
    progress: &'a mut P,
    category_map: BTreeMap<u64, u64>,
    section_map: BTreeMap<u64, u64>,
    article_map: BTreeMap<u64, u64>,
    seen_categories: Vec<u64>,
    mapped_sections: Vec<u64>,
}

impl<'a, S, D, P> HelpCenterCopier<'a, S, D, P>
where
    S: HelpCenterReadApi,
    D: HelpCenterWriteApi,
    P: CopyProgress,
{
    pub fn new(source: &'a mut S, dest: &'a mut D, progress: &'a mut P) -> Self {
        Self {
            source,
            dest,
            progress,
            category_map: BTreeMap::new(),
            section_map: BTreeMap::new(),
            article_map: BTreeMap::new(),
            seen_categories: Vec::new(),
            mapped_sections: Vec::new(),
        }
    }

    /// Runs the whole copy. Per-record and per-listing failures are folded
    /// into the report and never abort the run; only the
    /// missing-permission-group condition marks the run failed.
    pub fn copy_all(mut self) -> CopyReport {
        let mut report = CopyReport::empty();
        self.copy_categories(&mut report);
        self.copy_sections(&mut report);
        self.copy_articles(&mut report);

        report.source_requests = self.source.request_count();
        report.dest_requests = self.dest.request_count();
        report.category_map = self.category_map;
        report.section_map = self.section_map;
        report.article_map = self.article_map;
        report
    }

    fn copy_categories(&mut self, report: &mut CopyReport) {
        self.progress.on_event(&CopyEvent::PhaseStarted {
            phase: CopyPhase::Categories,
        });

        for item in self.source.list_categories() {
            let category = match item {
                Ok(category) => category,
                Err(error) => {
                    report
                        .errors
                        .push(format!("category listing failed: {error:#}"));
                    self.progress.on_event(&CopyEvent::ListingFailed {
                        phase: CopyPhase::Categories,
                        parent_id: None,
                        error: format!("{error:#}"),
                    });
                    break;
                }
            };

            report.categories.found += 1;
            if self.category_map.contains_key(&category.id) {
                report.categories.skipped += 1;
                self.progress.on_event(&CopyEvent::Skipped {
                    phase: CopyPhase::Categories,
                    source_id: category.id,
                    name: category.name.clone(),
                    reason: "duplicate source id".to_string(),
                });
                continue;
            }
            self.seen_categories.push(category.id);

            let attrs = NewCategory {
                name: category.name.clone(),
                description: category.description.clone(),
                locale: category.locale.clone(),
                position: category.position,
            };
            match self.dest.create_category(&attrs) {
                Ok(created) => {
                    self.category_map.insert(category.id, created.id);
                    report.categories.created += 1;
                    self.progress.on_event(&CopyEvent::Created {
                        phase: CopyPhase::Categories,
                        source_id: category.id,
                        dest_id: created.id,
                        name: category.name,
                    });
                }
                Err(error) => {
                    report.categories.failed += 1;
                    report.errors.push(format!(
                        "category '{}' ({}): {error:#}",
                        category.name, category.id
                    ));
                    self.progress.on_event(&CopyEvent::Failed {
                        phase: CopyPhase::Categories,
                        source_id: category.id,
                        name: category.name,
                        error: format!("{error:#}"),
                    });
                }
            }
        }
    }

    fn copy_sections(&mut self, report: &mut CopyReport) {
        self.progress.on_event(&CopyEvent::PhaseStarted {
            phase: CopyPhase::Sections,
        });

        // Every listed category is walked, including ones whose create
        // failed, so that sections under a failed parent are recorded as
        // skipped instead of silently vanishing.
        let parents = self.seen_categories.clone();
        for source_category_id in parents {
            for item in self.source.list_sections(source_category_id) {
                let section = match item {
                    Ok(section) => section,
                    Err(error) => {
                        report.errors.push(format!(
                            "section listing for category {source_category_id} failed: {error:#}"
                        ));
                        self.progress.on_event(&CopyEvent::ListingFailed {
                            phase: CopyPhase::Sections,
                            parent_id: Some(source_category_id),
                            error: format!("{error:#}"),
                        });
                        break;
                    }
                };

                report.sections.found += 1;
                let dest_category_id = match self.category_map.get(&section.category_id) {
                    Some(id) => *id,
                    None => {
                        report.sections.skipped += 1;
                        self.progress.on_event(&CopyEvent::Skipped {
                            phase: CopyPhase::Sections,
                            source_id: section.id,
                            name: section.name.clone(),
                            reason: format!(
                                "category {} was not copied",
                                section.category_id
                            ),
                        });
                        continue;
                    }
                };
                if self.section_map.contains_key(&section.id) {
                    report.sections.skipped += 1;
                    self.progress.on_event(&CopyEvent::Skipped {
                        phase: CopyPhase::Sections,
                        source_id: section.id,
                        name: section.name.clone(),
                        reason: "duplicate source id".to_string(),
                    });
                    continue;
                }

                let attrs = NewSection {
                    name: section.name.clone(),
                    description: section.description.clone(),
                    locale: section.locale.clone(),
                    position: section.position,
                };
                match self.dest.create_section(dest_category_id, &attrs) {
                    Ok(created) => {
                        self.section_map.insert(section.id, created.id);
                        self.mapped_sections.push(section.id);
                        report.sections.created += 1;
                        self.progress.on_event(&CopyEvent::Created {
                            phase: CopyPhase::Sections,
                            source_id: section.id,
                            dest_id: created.id,
                            name: section.name,
                        });
                    }
                    Err(error) => {
                        report.sections.failed += 1;
                        report.errors.push(format!(
                            "section '{}' ({}): {error:#}",
                            section.name, section.id
                        ));
                        self.progress.on_event(&CopyEvent::Failed {
                            phase: CopyPhase::Sections,
                            source_id: section.id,
                            name: section.name,
                            error: format!("{error:#}"),
                        });
                    }
                }
            }
        }
    }

    fn copy_articles(&mut self, report: &mut CopyReport) {
        self.progress.on_event(&CopyEvent::PhaseStarted {
            phase: CopyPhase::Articles,
        });

        // Resolved once per run; the destination's own ordering decides
        // which group is "first". That ordering is undocumented remote
        // policy and is preserved literally.
        let permission_group_id = match self.dest.list_permission_groups() {
            Ok(groups) => match groups.first() {
                Some(group) => group.id,
                None => {
                    report.success = false;
                    report.errors.push(
                        "destination has no permission groups; aborting article copy"
                            .to_string(),
                    );
                    return;
                }
            },
            Err(error) => {
                report.success = false;
                report.errors.push(format!(
                    "failed to list destination permission groups: {error:#}"
                ));
                return;
            }
        };

        let parents = self.mapped_sections.clone();
        for source_section_id in parents {
            for item in self.source.list_articles(source_section_id) {
                let article = match item {
                    Ok(article) => article,
                    Err(error) => {
                        report.errors.push(format!(
                            "article listing for section {source_section_id} failed: {error:#}"
                        ));
                        self.progress.on_event(&CopyEvent::ListingFailed {
                            phase: CopyPhase::Articles,
                            parent_id: Some(source_section_id),
                            error: format!("{error:#}"),
                        });
                        break;
                    }
                };

                report.articles.found += 1;
                let dest_section_id = match self.section_map.get(&article.section_id) {
                    Some(id) => *id,
                    None => {
                        report.articles.skipped += 1;
                        self.progress.on_event(&CopyEvent::Skipped {
                            phase: CopyPhase::Articles,
                            source_id: article.id,
                            name: article.title.clone(),
                            reason: format!("section {} was not copied", article.section_id),
                        });
                        continue;
                    }
                };
                if self.article_map.contains_key(&article.id) {
                    report.articles.skipped += 1;
                    self.progress.on_event(&CopyEvent::Skipped {
                        phase: CopyPhase::Articles,
                        source_id: article.id,
                        name: article.title.clone(),
                        reason: "duplicate source id".to_string(),
                    });
                    continue;
                }

                let attrs = NewArticle {
                    title: article.title.clone(),
                    body: article.body.clone(),
                    locale: article.locale.clone(),
                    position: article.position,
                    draft: article.draft,
                    promoted: article.promoted,
                    permission_group_id,
                    // Segments are not migrated; an explicit null keeps the
                    // article visible to all users.
                    user_segment_id: None,
                };
                match self.dest.create_article(dest_section_id, &attrs) {
                    Ok(created) => {
                        self.article_map.insert(article.id, created.id);
                        report.articles.created += 1;
                        self.progress.on_event(&CopyEvent::Created {
                            phase: CopyPhase::Articles,
                            source_id: article.id,
                            dest_id: created.id,
                            name: article.title,
                        });
                    }
                    Err(error) => {
                        report.articles.failed += 1;
                        if report.first_article_failure.is_none() {
                            report.first_article_failure = Some(ArticleFailure {
                                source_article_id: article.id,
                                title: article.title.clone(),
                                destination_section_id: dest_section_id,
                                payload: serde_json::to_value(&attrs)
                                    .unwrap_or(Value::Null),
                                error: format!("{error:#}"),
                            });
                        }
                        report.errors.push(format!(
                            "article '{}' ({}): {error:#}",
                            article.title, article.id
                        ));
                        self.progress.on_event(&CopyEvent::Failed {
                            phase: CopyPhase::Articles,
                            source_id: article.id,
                            name: article.title,
                            error: format!("{error:#}"),
                        });
                    }
                }
            }
        }
    }
}
