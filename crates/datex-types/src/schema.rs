//! Explicit type registration for host data crossing the wire.
//!
//! ```
//! use datex_types::{StdType, TypeRegistry, Value};
//!
//! let mut types = TypeRegistry::new();
//! types
//!     .register_type("Person")
//!     .with_property("name", StdType::Text)
//!     .with_property("age", StdType::Int);
//!
//! let person = types
//!     .get("Person")
//!     .unwrap()
//!     .instantiate([("name", Value::text("Ada")), ("age", Value::Int(36))])
//!     .unwrap();
//! assert!(matches!(person, Value::Object(_)));
//! ```

use crate::value::{TypeTag, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("{type_name} has no property '{property}'")]
    UnknownProperty { type_name: String, property: String },

    #[error("{type_name}.{property} is missing")]
    MissingProperty { type_name: String, property: String },

    #[error("{type_name}.{property} expects {expected}, got {found}")]
    PropertyType {
        type_name: String,
        property: String,
        expected: String,
        found: String,
    },

    #[error("{type_name} values must be objects")]
    NotAnObject { type_name: String },
}

/// A registered object type: ordered properties and their kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    properties: Vec<(String, TypeTag)>,
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> TypeTag {
        TypeTag::Named(self.name.clone())
    }

    pub fn properties(&self) -> &[(String, TypeTag)] {
        &self.properties
    }

    /// Add or replace a property.
    pub fn with_property(&mut self, name: impl Into<String>, kind: impl Into<TypeTag>) -> &mut Self {
        let name = name.into();
        let kind = kind.into();
        match self.properties.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = kind,
            None => self.properties.push((name, kind)),
        }
        self
    }

    /// Build an object value from host fields, checking every property.
    pub fn instantiate<K: Into<String>>(
        &self,
        fields: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Value, SchemaError> {
        let object: BTreeMap<String, Value> =
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let value = Value::Object(object);
        self.validate(&value)?;
        Ok(value)
    }

    /// Check that `value` is an object with exactly this type's properties.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        let Value::Object(entries) = value else {
            return Err(SchemaError::NotAnObject {
                type_name: self.name.clone(),
            });
        };
        if let Some(extra) = entries
            .keys()
            .find(|key| !self.properties.iter().any(|(name, _)| name == *key))
        {
            return Err(SchemaError::UnknownProperty {
                type_name: self.name.clone(),
                property: extra.clone(),
            });
        }
        for (property, kind) in &self.properties {
            let field = entries.get(property).ok_or_else(|| SchemaError::MissingProperty {
                type_name: self.name.clone(),
                property: property.clone(),
            })?;
            let accepted = match kind {
                TypeTag::Std(std) => field.std_type() == *std,
                TypeTag::Named(_) => matches!(field, Value::Object(_) | Value::Pointer(_)),
            };
            if !accepted {
                return Err(SchemaError::PropertyType {
                    type_name: self.name.clone(),
                    property: property.clone(),
                    expected: kind.to_string(),
                    found: TypeTag::Std(field.std_type()).to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Registered types by name.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` (or reopen it) and return its descriptor for
    /// `with_property` chaining.
    pub fn register_type(&mut self, name: impl Into<String>) -> &mut TypeDescriptor {
        let name = name.into();
        self.types
            .entry(name.clone())
            .or_insert_with(|| TypeDescriptor {
                name,
                properties: Vec::new(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    /// Validate `value` against the registered type `name`.
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))?
            .validate(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StdType;

    fn registry() -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types
            .register_type("Person")
            .with_property("name", StdType::Text)
            .with_property("age", StdType::Int);
        types
    }

    #[test]
    fn instantiate_checks_kinds() {
        let types = registry();
        let person = types.get("Person").unwrap();
        let err = person
            .instantiate([("name", Value::text("Ada")), ("age", Value::text("old"))])
            .unwrap_err();
        assert!(matches!(err, SchemaError::PropertyType { ref property, .. } if property == "age"));
    }

    #[test]
    fn validate_rejects_missing_and_extra() {
        let types = registry();
        let mut only_name = BTreeMap::new();
        only_name.insert("name".to_string(), Value::text("Ada"));
        assert!(matches!(
            types.validate("Person", &Value::Object(only_name.clone())),
            Err(SchemaError::MissingProperty { .. })
        ));
        only_name.insert("age".to_string(), Value::Int(1));
        only_name.insert("email".to_string(), Value::Null);
        assert!(matches!(
            types.validate("Person", &Value::Object(only_name)),
            Err(SchemaError::UnknownProperty { .. })
        ));
        assert!(matches!(
            types.validate("Robot", &Value::Null),
            Err(SchemaError::UnknownType(_))
        ));
    }

    #[test]
    fn reopening_a_type_replaces_properties() {
        let mut types = registry();
        types.register_type("Person").with_property("age", StdType::Float);
        let person = types.get("Person").unwrap();
        assert_eq!(person.properties().len(), 2);
        assert_eq!(person.properties()[1].1, TypeTag::Std(StdType::Float));
        assert_eq!(person.tag().to_string(), "<Person>");
    }
}
