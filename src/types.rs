//! Request and result types exchanged with orchestrator callers.

use reservoir_core::constants::MAX_BATCH_RESOURCES;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ResourceError;

/// Change `num` units of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResourceParam {
    pub resource_id: String,
    pub num: u32,
}

impl UpdateResourceParam {
    pub fn new(resource_id: impl Into<String>, num: u32) -> Self {
        Self {
            resource_id: resource_id.into(),
            num,
        }
    }
}

/// Ask whether `acquire` units of one resource are cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResourceParam {
    pub resource_id: String,
    pub acquire: u32,
}

impl QueryResourceParam {
    pub fn new(resource_id: impl Into<String>, acquire: u32) -> Self {
        Self {
            resource_id: resource_id.into(),
            acquire,
        }
    }
}

/// Cached count for one resource and whether it covers the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResourceResult {
    pub resource_id: String,
    pub acquire: u32,
    pub num: i64,
    pub fill: bool,
}

/// Both pools' cached counts for one resource. `None` means not cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermit {
    pub resource_id: String,
    pub available: Option<i64>,
    pub pre_locked: Option<i64>,
}

/// Validate and sort update parameters into the global lock order.
///
/// Rejects empty lists (unless `allow_empty`), duplicate ids, empty ids and
/// oversized batches.
pub(crate) fn normalize_params(
    params: Vec<UpdateResourceParam>,
    allow_empty: bool,
) -> Result<Vec<UpdateResourceParam>, ResourceError> {
    if params.is_empty() {
        if allow_empty {
            return Ok(params);
        }
        return Err(ResourceError::run("resource params must not be empty"));
    }
    check_batch(params.iter().map(|p| p.resource_id.as_str()), params.len())?;

    let mut params = params;
    params.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
    if let Some(pair) = params.windows(2).find(|w| w[0].resource_id == w[1].resource_id) {
        return Err(ResourceError::run(format!("duplicate resource id: {}", pair[0].resource_id)));
    }
    Ok(params)
}

/// Validate and sort query parameters.
pub(crate) fn normalize_queries(params: Vec<QueryResourceParam>) -> Result<Vec<QueryResourceParam>, ResourceError> {
    if params.is_empty() {
        return Ok(params);
    }
    check_batch(params.iter().map(|p| p.resource_id.as_str()), params.len())?;

    let mut params = params;
    params.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
    params.dedup_by(|a, b| a.resource_id == b.resource_id && a.acquire == b.acquire);
    Ok(params)
}

fn check_batch<'a>(mut ids: impl Iterator<Item = &'a str>, len: usize) -> Result<(), ResourceError> {
    if len > MAX_BATCH_RESOURCES as usize {
        return Err(ResourceError::run(format!(
            "too many resources in one call: {len} (max: {MAX_BATCH_RESOURCES})"
        )));
    }
    if ids.any(str::is_empty) {
        return Err(ResourceError::run("resource id must not be empty"));
    }
    Ok(())
}

/// Ids of already-normalized params, in order.
pub(crate) fn resource_ids(params: &[UpdateResourceParam]) -> Vec<String> {
    params.iter().map(|p| p.resource_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sorts_by_resource_id() {
        let params = vec![
            UpdateResourceParam::new("c", 1),
            UpdateResourceParam::new("a", 2),
            UpdateResourceParam::new("b", 3),
        ];
        let sorted = normalize_params(params, false).unwrap();
        assert_eq!(resource_ids(&sorted), vec!["a", "b", "c"]);
        assert_eq!(sorted[0].num, 2);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(matches!(normalize_params(vec![], false), Err(ResourceError::Run { .. })));
        assert!(normalize_params(vec![], true).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_rejects_duplicates() {
        let params = vec![UpdateResourceParam::new("a", 1), UpdateResourceParam::new("a", 2)];
        let err = normalize_params(params, false).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_normalize_rejects_empty_id() {
        let params = vec![UpdateResourceParam::new("", 1)];
        assert!(matches!(normalize_params(params, true), Err(ResourceError::Run { .. })));
    }

    #[test]
    fn test_normalize_rejects_oversized_batch() {
        let params = (0..=MAX_BATCH_RESOURCES).map(|i| UpdateResourceParam::new(format!("r{i}"), 1)).collect();
        assert!(matches!(normalize_params(params, false), Err(ResourceError::Run { .. })));
    }

    #[test]
    fn test_normalize_queries_dedups_identical() {
        let params = vec![
            QueryResourceParam::new("b", 1),
            QueryResourceParam::new("a", 1),
            QueryResourceParam::new("b", 1),
        ];
        let sorted = normalize_queries(params).unwrap();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].resource_id, "a");
    }
}
