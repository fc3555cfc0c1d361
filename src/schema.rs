use crate::value::Value;
use crate::Error;
use std::collections::BTreeMap;

/// How a field's values turn into terms.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Analyzed prose; one posting per token.
    Text,
    /// A single atomic token; the whole value is the term.
    Id,
    /// Signed integer, order-preserving term bytes.
    I64,
    /// Float, order-preserving term bytes.
    F64,
    /// Retrievable only; never indexed.
    StoredOnly,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOptions {
    pub kind: FieldKind,
    pub indexed: bool,
    pub stored: bool,
    /// Length recorded per doc for scoring normalization.
    pub scorable: bool,
    pub positions: bool,
    pub offsets: bool,
    pub boosts: bool,
    /// Values identify documents for update/delete.
    pub unique: bool,
}

impl FieldOptions {
    pub fn text() -> Self {
        Self {
            kind: FieldKind::Text,
            indexed: true,
            stored: true,
            scorable: true,
            positions: true,
            offsets: false,
            boosts: false,
            unique: false,
        }
    }
    pub fn id() -> Self {
        Self {
            kind: FieldKind::Id,
            indexed: true,
            stored: true,
            scorable: false,
            positions: false,
            offsets: false,
            boosts: false,
            unique: false,
        }
    }
    pub fn i64() -> Self {
        Self {
            kind: FieldKind::I64,
            ..Self::id()
        }
    }
    pub fn f64() -> Self {
        Self {
            kind: FieldKind::F64,
            ..Self::id()
        }
    }
    pub fn stored_only() -> Self {
        Self {
            kind: FieldKind::StoredOnly,
            indexed: false,
            stored: true,
            scorable: false,
            positions: false,
            offsets: false,
            boosts: false,
            unique: false,
        }
    }
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
    pub fn not_stored(mut self) -> Self {
        self.stored = false;
        self
    }
    pub fn without_positions(mut self) -> Self {
        self.positions = false;
        self
    }
    pub fn with_offsets(mut self) -> Self {
        self.offsets = true;
        self
    }

    /// Reject values the field kind cannot index or store.
    pub fn check_value(&self, field: &str, value: &Value) -> Result<(), Error> {
        let ok = match (self.kind, value) {
            (FieldKind::Text, Value::Str(_)) => true,
            (FieldKind::Id, Value::Str(_)) => true,
            (FieldKind::I64, Value::Int(_)) => true,
            (FieldKind::F64, Value::Float(_)) | (FieldKind::F64, Value::Int(_)) => true,
            (FieldKind::StoredOnly, _) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::IndexingError(format!(
                "field '{}' ({:?}) cannot take {:?}",
                field, self.kind, value
            )))
        }
    }
}

/// Ordered mapping of field name to options; immutable per segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<(String, FieldOptions)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, name: &str, options: FieldOptions) -> Result<(), Error> {
        if self.get(name).is_some() {
            return Err(Error::SchemaMismatch(format!(
                "field '{}' declared twice",
                name
            )));
        }
        self.fields.push((name.to_string(), options));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldOptions> {
        self.fields
            .iter()
            .find(|(fname, _)| fname == name)
            .map(|(_, opts)| opts)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldOptions)> {
        self.fields.iter().map(|(n, o)| (n.as_str(), o))
    }

    pub fn scorable_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, o)| o.scorable)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn unique_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, o)| o.unique)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Identity of this schema as committed; compared on every open.
    pub fn fingerprint(&self) -> u32 {
        let json = serde_json::to_vec(self).expect("schema serializes");
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&json);
        hasher.finalize()
    }

    /// A schema may grow between commits, but existing fields must keep
    /// identical semantics.
    pub fn check_extends(&self, prior: &Schema) -> Result<(), Error> {
        for (name, old) in prior.fields() {
            match self.get(name) {
                Some(new) if new == old => {}
                Some(_) => {
                    return Err(Error::SchemaMismatch(format!(
                        "field '{}' changed semantics",
                        name
                    )));
                }
                None => {
                    return Err(Error::SchemaMismatch(format!("field '{}' removed", name)));
                }
            }
        }
        Ok(())
    }
}

/// One logical unit of input; field order is preserved.
#[derive(Debug, Clone, Default)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.push((field.to_string(), value.into()));
        self
    }
    pub fn push(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.push((field.to_string(), value.into()));
    }
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
    /// Stored representation: field name -> value map.
    pub fn to_stored(&self, schema: &Schema) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        for (name, value) in self.fields() {
            let stored = schema.get(name).map(|o| o.stored).unwrap_or(false);
            if stored {
                map.insert(name.to_string(), value.clone());
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn books() -> Schema {
        let mut schema = Schema::new();
        schema.add_field("id", FieldOptions::id().unique()).unwrap();
        schema.add_field("title", FieldOptions::text()).unwrap();
        schema
            .add_field("year", FieldOptions::i64())
            .unwrap();
        schema
    }

    #[test]
    fn duplicate_field_rejected() {
        let mut schema = books();
        match schema.add_field("id", FieldOptions::id()) {
            Err(Error::SchemaMismatch(_)) => {}
            _ => panic!("duplicate should fail"),
        }
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = books();
        let b = books();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = books();
        c.add_field("extra", FieldOptions::stored_only()).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn extension_rules() {
        let base = books();
        let mut grown = books();
        grown.add_field("isbn", FieldOptions::id()).unwrap();
        assert!(grown.check_extends(&base).is_ok());
        // shrunk or changed is not an extension:
        assert!(base.check_extends(&grown).is_err());

        let mut mutated = Schema::new();
        mutated.add_field("id", FieldOptions::id()).unwrap();
        mutated.add_field("title", FieldOptions::text()).unwrap();
        mutated.add_field("year", FieldOptions::i64()).unwrap();
        assert!(mutated.check_extends(&base).is_err());
    }

    #[test]
    fn value_checks() {
        let schema = books();
        let year = schema.get("year").unwrap();
        assert!(year.check_value("year", &Value::Int(1813)).is_ok());
        match year.check_value("year", &Value::from("not a number")) {
            Err(Error::IndexingError(_)) => {}
            _ => panic!("kind mismatch should fail"),
        }
    }
}
