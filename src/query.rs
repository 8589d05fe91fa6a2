// ABOUTME: Builds FileMaker find payloads from declarative query groups
// ABOUTME: Groups are OR-combined; criteria within a group are AND-combined

use std::collections::HashSet;

use crate::config::{QueryCriterion, QueryGroup};
use crate::error::{ExtractError, Result};
use crate::filemaker::FindPayload;

/// The request plan for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindPlan {
    /// No filters at all; the layout's list endpoint is the match-all request.
    ListAll,
    /// One find payload per query group, OR-combined by the pager.
    Find(Vec<FindPayload>),
}

/// Translates query groups into find payloads.
///
/// The incremental filter, when present, is appended as an AND-criterion to
/// every group so the watermark bound applies uniformly across all
/// OR-branches. A group that already constrains the incremental field ends up
/// constraining it twice, which the server resolves in surprising ways; that
/// overlap is logged but not rejected.
pub fn build_plan(
    groups: &[QueryGroup],
    incremental_filter: Option<&QueryCriterion>,
) -> Result<FindPlan> {
    for (index, group) in groups.iter().enumerate() {
        let mut seen = HashSet::new();
        for criterion in group {
            if criterion.field_name.is_empty() {
                return Err(ExtractError::Config(format!(
                    "empty field_name in query group {}",
                    index + 1
                )));
            }
            if !seen.insert(criterion.field_name.as_str()) {
                return Err(ExtractError::Config(format!(
                    "duplicate field '{}' in query group {}; criteria within a group \
                     are AND-combined and each field may appear only once",
                    criterion.field_name,
                    index + 1
                )));
            }
        }
    }

    if groups.is_empty() && incremental_filter.is_none() {
        return Ok(FindPlan::ListAll);
    }

    let mut payloads = Vec::new();
    if groups.is_empty() {
        if let Some(filter) = incremental_filter {
            let mut payload = FindPayload::new();
            payload.push(&filter.field_name, &filter.find_criteria);
            payloads.push(payload);
        }
    } else {
        for group in groups {
            let mut payload = FindPayload::new();
            for criterion in group {
                payload.push(&criterion.field_name, &criterion.find_criteria);
            }
            if let Some(filter) = incremental_filter {
                if payload.contains_field(&filter.field_name) {
                    tracing::warn!(
                        "incremental field '{}' is also constrained by a query group; \
                         the watermark bound will constrain it a second time",
                        filter.field_name
                    );
                }
                payload.push(&filter.field_name, &filter.find_criteria);
            }
            payloads.push(payload);
        }
    }
    Ok(FindPlan::Find(payloads))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(field: &str, value: &str) -> QueryCriterion {
        QueryCriterion {
            field_name: field.to_string(),
            find_criteria: value.to_string(),
        }
    }

    #[test]
    fn test_empty_groups_without_filter_is_list_all() {
        assert_eq!(build_plan(&[], None).unwrap(), FindPlan::ListAll);
    }

    #[test]
    fn test_one_payload_per_group() {
        let groups = vec![
            vec![criterion("Status", "Active")],
            vec![criterion("Status", "Pending")],
        ];
        let plan = build_plan(&groups, None).unwrap();
        let FindPlan::Find(payloads) = plan else {
            panic!("expected find payloads");
        };
        assert_eq!(payloads.len(), 2);
        assert_eq!(
            serde_json::to_string(&payloads[0]).unwrap(),
            r#"{"Status":"Active"}"#
        );
        assert_eq!(
            serde_json::to_string(&payloads[1]).unwrap(),
            r#"{"Status":"Pending"}"#
        );
    }

    #[test]
    fn test_criteria_within_group_are_and_combined() {
        let groups = vec![vec![
            criterion("Status", "Active"),
            criterion("Region", "EMEA"),
        ]];
        let FindPlan::Find(payloads) = build_plan(&groups, None).unwrap() else {
            panic!("expected find payloads");
        };
        assert_eq!(payloads[0].len(), 2);
    }

    #[test]
    fn test_duplicate_field_in_group_is_config_error() {
        let groups = vec![vec![
            criterion("Status", "Active"),
            criterion("Status", "Pending"),
        ]];
        let err = build_plan(&groups, None).unwrap_err();
        assert!(matches!(err, ExtractError::Config(_)));
        assert!(err.to_string().contains("duplicate field 'Status'"));
    }

    #[test]
    fn test_same_field_across_groups_is_legal() {
        let groups = vec![
            vec![criterion("Status", "Active")],
            vec![criterion("Status", "Pending")],
        ];
        assert!(build_plan(&groups, None).is_ok());
    }

    #[test]
    fn test_incremental_filter_appended_to_every_group() {
        let groups = vec![
            vec![criterion("Status", "Active")],
            vec![criterion("Status", "Pending")],
        ];
        let filter = criterion("_Timestamp_Modified", ">= 01/01/2024 00:00:00");
        let FindPlan::Find(payloads) = build_plan(&groups, Some(&filter)).unwrap() else {
            panic!("expected find payloads");
        };
        for payload in &payloads {
            assert!(payload.contains_field("_Timestamp_Modified"));
            assert_eq!(payload.len(), 2);
        }
    }

    #[test]
    fn test_filter_without_groups_yields_single_payload() {
        let filter = criterion("_Timestamp_Modified", ">= 01/01/2024 00:00:00");
        let FindPlan::Find(payloads) = build_plan(&[], Some(&filter)).unwrap() else {
            panic!("expected find payloads");
        };
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].len(), 1);
    }

    #[test]
    fn test_empty_field_name_rejected() {
        let groups = vec![vec![criterion("", "Active")]];
        assert!(build_plan(&groups, None).is_err());
    }
}
