//! suggestions.rs — Starter questions derived from a column schema.

use crate::schema_profile::{ColumnSchema, ColumnType};

pub const MAX_SUGGESTIONS: usize = 4;

/// Up to four questions a user could ask about this dataset, built from the
/// first numeric, text and date columns.
///
/// `Date, Product, Sales` yields "What were total Sales?",
/// "Show me Sales by Product", "Which Product had highest Sales?" and
/// "Show me Sales by Date".
pub fn suggest_questions(schema: &ColumnSchema) -> Vec<String> {
    let numeric = schema.columns_of(ColumnType::Number).first().copied();
    let text = schema.columns_of(ColumnType::Text).first().copied();
    let date = schema.columns_of(ColumnType::Date).first().copied();

    let mut out = Vec::new();

    if let Some(num) = numeric {
        out.push(format!("What were total {num}?"));
    }
    if let (Some(cat), Some(num)) = (text, numeric) {
        out.push(format!("Show me {num} by {cat}"));
        out.push(format!("Which {cat} had highest {num}?"));
    }
    if let (Some(d), Some(num)) = (date, numeric) {
        out.push(format!("Show me {num} by {d}"));
    }
    if let Some(cat) = text {
        out.push(format!("How many unique {cat}?"));
    }
    if let Some(num) = numeric {
        out.push(format!("What is the average {num}?"));
    }

    out.truncate(MAX_SUGGESTIONS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sales_dataset() {
        let schema = ColumnSchema::from_pairs([
            ("Date", ColumnType::Date),
            ("Product", ColumnType::Text),
            ("Sales", ColumnType::Number),
            ("Quantity", ColumnType::Number),
            ("Region", ColumnType::Text),
        ]);
        assert_eq!(
            suggest_questions(&schema),
            vec![
                "What were total Sales?",
                "Show me Sales by Product",
                "Which Product had highest Sales?",
                "Show me Sales by Date",
            ]
        );
    }

    #[test]
    fn test_text_only_dataset() {
        let schema = ColumnSchema::from_pairs([("Name", ColumnType::Text), ("Notes", ColumnType::Unknown)]);
        assert_eq!(suggest_questions(&schema), vec!["How many unique Name?"]);
        assert!(suggest_questions(&ColumnSchema::new()).is_empty());
    }

    #[test]
    fn test_numbers_only_dataset() {
        let schema = ColumnSchema::from_pairs([("Price", ColumnType::Number)]);
        assert_eq!(
            suggest_questions(&schema),
            vec!["What were total Price?", "What is the average Price?"]
        );
    }
}
