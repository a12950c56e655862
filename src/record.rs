use crate::ast::FieldName;

/// One row of input: field names mapped to raw string values.
///
/// Values are always stored as plain strings. Reading a field that is not
/// present yields the empty string. Fields keep the order in which they were
/// first set, so input columns come first, in input order, followed by the
/// fields a program adds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Record(Vec<(FieldName, String)>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, field: &str) -> Option<usize> {
        self.0.iter().position(|(name, _)| name == field)
    }

    pub fn get(&self, field: &str) -> &str {
        match self.position(field) {
            Some(i) => &self.0[i].1,
            None => "",
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.position(field).is_some()
    }

    /// Overwrites `field` in place, or appends it when it is new.
    pub fn set(&mut self, field: impl Into<FieldName>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        match self.position(&field) {
            Some(i) => self.0[i].1 = value,
            None => self.0.push((field, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<FieldName>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (field, value) in iter {
            record.set(field, value);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_reads_empty() {
        let record: Record = [("amount", "1.00")].into_iter().collect();
        assert_eq!(record.get("amount"), "1.00");
        assert_eq!(record.get("Amount"), "");
        assert!(!record.contains("Amount"));
    }

    #[test]
    fn test_set_overwrites() {
        let mut record = Record::new();
        record.set("account", "Assets:Cash");
        record.set("account", "Expenses:Food");
        assert_eq!(record.get("account"), "Expenses:Food");
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_fields_keep_insertion_order() {
        let mut record: Record = [("date", "2021-03-01"), ("amount", "-20.00"), ("date", "x")]
            .into_iter()
            .collect();
        record.set("account", "Expenses:Drinks");
        record.set("amount", "-21.00");
        let fields: Vec<_> = record.iter().collect();
        assert_eq!(
            fields,
            vec![
                ("date", "x"),
                ("amount", "-21.00"),
                ("account", "Expenses:Drinks")
            ]
        );
    }
}
