use serde::Serialize;

use crate::client::{Category, HelpCenterReadApi, HelpCenterWriteApi};

#[derive(Debug, Clone, Serialize)]
pub struct CategoryDeleteResult {
    pub category_id: u64,
    pub name: String,
    pub deleted: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub success: bool,
    pub found: usize,
    pub deleted: usize,
    pub failed: usize,
    pub results: Vec<CategoryDeleteResult>,
    pub errors: Vec<String>,
}

/// Drains the category listing eagerly so deletions never race the
/// paginated cursor they would otherwise invalidate. A listing failure
/// partway through keeps the categories fetched so far and records the
/// error alongside them.
pub fn collect_categories<A: HelpCenterReadApi>(
    api: &mut A,
) -> (Vec<Category>, Vec<String>) {
    let mut categories = Vec::new();
    let mut errors = Vec::new();
    for item in api.list_categories() {
        match item {
            Ok(category) => categories.push(category),
            Err(error) => {
                errors.push(format!("category listing failed: {error:#}"));
                break;
            }
        }
    }
    (categories, errors)
}

/// Deletes the given categories one by one. The remote side cascades each
/// delete to the sections and articles underneath, so only the top level is
/// touched here. A failed delete is recorded and the walk continues.
pub fn delete_categories<A: HelpCenterWriteApi>(
    api: &mut A,
    categories: &[Category],
) -> CleanupReport {
    let mut report = CleanupReport {
        success: true,
        found: categories.len(),
        deleted: 0,
        failed: 0,
        results: Vec::with_capacity(categories.len()),
        errors: Vec::new(),
    };

    for category in categories {
        match api.delete_category(category.id) {
            Ok(()) => {
                report.deleted += 1;
                report.results.push(CategoryDeleteResult {
                    category_id: category.id,
                    name: category.name.clone(),
                    deleted: true,
                    error: None,
                });
            }
            Err(error) => {
                report.failed += 1;
                report.success = false;
                report.errors.push(format!(
                    "category '{}' ({}): {error:#}",
                    category.name, category.id
                ));
                report.results.push(CategoryDeleteResult {
                    category_id: category.id,
                    name: category.name.clone(),
                    deleted: false,
                    error: Some(format!("{error:#}")),
                });
            }
        }
    }

    report
}

/// Lists every category on the instance and deletes them all. Used by the
/// destructive cleanup path after the caller has confirmed.
pub fn delete_all_categories<A: HelpCenterWriteApi>(api: &mut A) -> CleanupReport {
    let (categories, listing_errors) = collect_categories(api);
    let mut report = delete_categories(api, &categories);
    if !listing_errors.is_empty() {
        report.success = false;
        report.errors.extend(listing_errors);
    }
    report
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use anyhow::Result;

    use super::{collect_categories, delete_all_categories, delete_categories};
    use crate::client::{
        Article, Category, HelpCenterReadApi, HelpCenterWriteApi, NewArticle, NewCategory,
        NewSection, PermissionGroup, Section,
    };

    #[derive(Default)]
    struct MockCleanupApi {
        categories: Vec<Category>,
        listing_error: Option<String>,
        fail_deletes: BTreeSet<u64>,
        deleted: Vec<u64>,
        request_count: usize,
    }

    impl HelpCenterReadApi for MockCleanupApi {
        fn test_connection(&mut self) -> Result<()> {
            Ok(())
        }

        fn list_categories(&mut self) -> Box<dyn Iterator<Item = Result<Category>> + '_> {
            self.request_count += 1;
            let mut items = self
                .categories
                .iter()
                .cloned()
                .map(Ok)
                .collect::<Vec<Result<Category>>>();
            if let Some(message) = &self.listing_error {
                items.push(Err(anyhow::anyhow!("{message}")));
            }
            Box::new(items.into_iter())
        }

        fn list_sections(
            &mut self,
            _category_id: u64,
        ) -> Box<dyn Iterator<Item = Result<Section>> + '_> {
            Box::new(std::iter::empty())
        }

        fn list_articles(
            &mut self,
            _section_id: u64,
        ) -> Box<dyn Iterator<Item = Result<Article>> + '_> {
            Box::new(std::iter::empty())
        }

        fn list_permission_groups(&mut self) -> Result<Vec<PermissionGroup>> {
            Ok(Vec::new())
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    impl HelpCenterWriteApi for MockCleanupApi {
        fn create_category(&mut self, _attrs: &NewCategory) -> Result<Category> {
            anyhow::bail!("not used")
        }

        fn create_section(&mut self, _category_id: u64, _attrs: &NewSection) -> Result<Section> {
            anyhow::bail!("not used")
        }

        fn create_article(&mut self, _section_id: u64, _attrs: &NewArticle) -> Result<Article> {
            anyhow::bail!("not used")
        }

        fn delete_category(&mut self, category_id: u64) -> Result<()> {
            self.request_count += 1;
            if self.fail_deletes.contains(&category_id) {
                anyhow::bail!("HTTP 422 deleting category {category_id}");
            }
            self.deleted.push(category_id);
            Ok(())
        }
    }

    fn category(id: u64, name: &str) -> Category {
        Category {
            id,
            name: name.to_string(),
            description: String::new(),
            locale: "en-us".to_string(),
            position: 0,
        }
    }

    #[test]
    fn deletes_every_listed_category() {
        let mut api = MockCleanupApi {
            categories: vec![category(1, "A"), category(2, "B"), category(3, "C")],
            ..Default::default()
        };

        let report = delete_all_categories(&mut api);

        assert!(report.success);
        assert_eq!(report.found, 3);
        assert_eq!(report.deleted, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(api.deleted, vec![1, 2, 3]);
    }

    #[test]
    fn failed_delete_is_recorded_and_the_walk_continues() {
        let mut api = MockCleanupApi {
            categories: vec![category(1, "A"), category(2, "B"), category(3, "C")],
            ..Default::default()
        };
        api.fail_deletes.insert(2);

        let report = delete_all_categories(&mut api);

        assert!(!report.success);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(api.deleted, vec![1, 3]);
        let failed = report
            .results
            .iter()
            .find(|result| result.category_id == 2)
            .expect("result row for category 2");
        assert!(!failed.deleted);
        assert!(failed.error.as_deref().is_some_and(|e| e.contains("422")));
    }

    #[test]
    fn listing_failure_still_deletes_what_was_fetched() {
        let mut api = MockCleanupApi {
            categories: vec![category(1, "A")],
            listing_error: Some("HTTP 503 on page 2".to_string()),
            ..Default::default()
        };

        let report = delete_all_categories(&mut api);

        assert!(!report.success);
        assert_eq!(report.deleted, 1);
        assert_eq!(api.deleted, vec![1]);
        assert!(
            report
                .errors
                .iter()
                .any(|error| error.contains("category listing failed"))
        );
    }

    #[test]
    fn first_page_listing_failure_marks_the_run_failed() {
        let mut api = MockCleanupApi {
            listing_error: Some("HTTP 503 on page 1".to_string()),
            ..Default::default()
        };

        let (categories, errors) = collect_categories(&mut api);
        assert!(categories.is_empty());
        assert_eq!(errors.len(), 1);

        let report = delete_all_categories(&mut api);
        assert!(!report.success);
        assert_eq!(report.found, 0);
        assert_eq!(report.deleted, 0);
        assert!(api.deleted.is_empty());
        assert!(
            report
                .errors
                .iter()
                .any(|error| error.contains("category listing failed"))
        );
    }

    #[test]
    fn collect_returns_categories_in_listing_order() {
        let mut api = MockCleanupApi {
            categories: vec![category(5, "E"), category(1, "A")],
            ..Default::default()
        };

        let (categories, errors) = collect_categories(&mut api);

        assert!(errors.is_empty());
        assert_eq!(
            categories.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![5, 1]
        );
    }

    #[test]
    fn empty_instance_reports_nothing_to_delete() {
        let mut api = MockCleanupApi::default();

        let report = delete_categories(&mut api, &[]);

        assert!(report.success);
        assert_eq!(report.found, 0);
        assert_eq!(report.deleted, 0);
        assert!(report.results.is_empty());
    }
}
