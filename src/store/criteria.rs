//! `searchCriteria` query builder.
//!
//! Filter groups are AND-ed together, filters inside one group are OR-ed.
//! The Store expects the PHP array encoding
//! `searchCriteria[filterGroups][i][filters][j][field]=...`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Neq,
    In,
    Gt,
    Gteq,
    Lt,
    Lteq,
    Like,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Eq => "eq",
            Condition::Neq => "neq",
            Condition::In => "in",
            Condition::Gt => "gt",
            Condition::Gteq => "gteq",
            Condition::Lt => "lt",
            Condition::Lteq => "lteq",
            Condition::Like => "like",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub value: String,
    pub condition: Condition,
}

impl Filter {
    pub fn new(field: impl Into<String>, value: impl Into<String>, condition: Condition) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            condition,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    groups: Vec<Vec<Filter>>,
    page_size: Option<u32>,
    current_page: Option<i64>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter as its own group (AND with the others).
    pub fn filter(
        mut self,
        field: impl Into<String>,
        value: impl Into<String>,
        condition: Condition,
    ) -> Self {
        self.groups.push(vec![Filter::new(field, value, condition)]);
        self
    }

    /// Adds a group whose filters are OR-ed.
    pub fn any_of(mut self, filters: Vec<Filter>) -> Self {
        if !filters.is_empty() {
            self.groups.push(filters);
        }
        self
    }

    /// `in` filter over a list of values, comma joined.
    pub fn filter_in<I, S>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.filter(field, joined, Condition::In)
    }

    pub fn page(mut self, page_size: u32, current_page: i64) -> Self {
        self.page_size = Some(page_size);
        self.current_page = Some(current_page);
        self
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (i, group) in self.groups.iter().enumerate() {
            for (j, filter) in group.iter().enumerate() {
                let prefix = format!("searchCriteria[filterGroups][{i}][filters][{j}]");
                pairs.push((format!("{prefix}[field]"), filter.field.clone()));
                pairs.push((format!("{prefix}[value]"), filter.value.clone()));
                pairs.push((
                    format!("{prefix}[condition_type]"),
                    filter.condition.as_str().to_string(),
                ));
            }
        }
        if let Some(size) = self.page_size {
            pairs.push(("searchCriteria[pageSize]".into(), size.to_string()));
        }
        if let Some(page) = self.current_page {
            pairs.push(("searchCriteria[currentPage]".into(), page.to_string()));
        }
        if pairs.is_empty() {
            // The Store refuses list calls without any searchCriteria key.
            pairs.push(("searchCriteria".into(), String::new()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_indexed_separately() {
        let query = SearchCriteria::new()
            .filter("updated_at", "2024-01-01 00:00:00", Condition::Gteq)
            .any_of(vec![
                Filter::new("status", "pending", Condition::Eq),
                Filter::new("status", "processing", Condition::Eq),
            ])
            .page(100, 3)
            .to_query();

        assert_eq!(
            query[0],
            (
                "searchCriteria[filterGroups][0][filters][0][field]".to_string(),
                "updated_at".to_string()
            )
        );
        assert!(query.contains(&(
            "searchCriteria[filterGroups][1][filters][1][value]".to_string(),
            "processing".to_string()
        )));
        assert!(query.contains(&(
            "searchCriteria[filterGroups][0][filters][0][condition_type]".to_string(),
            "gteq".to_string()
        )));
        assert!(query.contains(&("searchCriteria[pageSize]".to_string(), "100".to_string())));
        assert!(query.contains(&("searchCriteria[currentPage]".to_string(), "3".to_string())));
    }

    #[test]
    fn in_filter_joins_values() {
        let query = SearchCriteria::new()
            .filter_in("sku", ["A", "B", "C"])
            .to_query();
        assert_eq!(query[1].1, "A,B,C");
        assert_eq!(query[2].1, "in");
    }

    #[test]
    fn empty_criteria_still_sends_key() {
        assert_eq!(
            SearchCriteria::new().to_query(),
            vec![("searchCriteria".to_string(), String::new())]
        );
    }

    #[test]
    fn empty_or_group_is_skipped() {
        let query = SearchCriteria::new().any_of(Vec::new()).page(10, 1).to_query();
        assert_eq!(query.len(), 2);
    }
}
