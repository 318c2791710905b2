//! Queue message wire types
//!
//! Both batch types are closed structs: unknown fields are rejected at
//! ingress so schema drift between stages surfaces as a reported unit
//! failure instead of silently dropped data.

use serde::{Deserialize, Serialize};

/// A batch of search-page numbers for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageBatch {
    pub transaction_type: String,
    pub page_numbers: Vec<u32>,
}

/// A batch of newly discovered listing ids for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdBatch {
    pub transaction_type: String,
    pub listing_ids: Vec<i64>,
}

impl PageBatch {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl IdBatch {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_batch_round_trip() {
        let batch = PageBatch {
            transaction_type: "house/for-sale".to_string(),
            page_numbers: vec![1, 2, 3],
        };
        let json = batch.to_json().unwrap();
        assert_eq!(PageBatch::from_json(&json).unwrap(), batch);
    }

    #[test]
    fn test_page_batch_wire_format() {
        let parsed = PageBatch::from_json(
            r#"{"transaction_type": "house/for-sale", "page_numbers": [4, 5]}"#,
        )
        .unwrap();
        assert_eq!(parsed.transaction_type, "house/for-sale");
        assert_eq!(parsed.page_numbers, vec![4, 5]);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = IdBatch::from_json(
            r#"{"transaction_type": "garage", "listing_ids": [1], "surprise": true}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(PageBatch::from_json(r#"{"transaction_type": "garage"}"#).is_err());
        assert!(IdBatch::from_json(r#"{"listing_ids": [1]}"#).is_err());
    }

    #[test]
    fn test_garbage_body_rejected() {
        assert!(PageBatch::from_json("not json at all").is_err());
    }
}
