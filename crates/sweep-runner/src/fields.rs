//! Named, typed field access on configurable components.
//!
//! A component either implements [`Configurable`] directly (for dynamic field
//! sets) or describes its fields once through [`Reflect::registry`], which
//! maps each field name to a getter/setter pair or to a nested component.

use crate::error::ConfigError;
use crate::value::{FieldValue, ValueKind};
use std::collections::BTreeMap;

pub trait Configurable {
    /// Name matched against the `owner` of property path nodes.
    fn type_name(&self) -> &str;

    fn field_names(&self) -> Vec<String>;

    /// Kind of a value field. Nested fields report `NotAssignable`.
    fn value_kind(&self, name: &str) -> Result<ValueKind, ConfigError>;

    fn value(&self, name: &str) -> Result<FieldValue, ConfigError>;

    fn set_value(&mut self, name: &str, value: FieldValue) -> Result<(), ConfigError>;

    fn nested(&self, name: &str) -> Result<&dyn Configurable, ConfigError>;

    fn nested_mut(&mut self, name: &str) -> Result<&mut dyn Configurable, ConfigError>;
}

type Getter<T> = fn(&T) -> FieldValue;
type Setter<T> = fn(&mut T, FieldValue) -> Result<(), String>;
type NestedGetter<T> = fn(&T) -> &dyn Configurable;
type NestedGetterMut<T> = fn(&mut T) -> &mut dyn Configurable;

enum Accessor<T> {
    Value {
        kind: ValueKind,
        get: Getter<T>,
        set: Setter<T>,
    },
    Nested {
        get: NestedGetter<T>,
        get_mut: NestedGetterMut<T>,
    },
}

pub struct FieldRegistry<T> {
    type_name: &'static str,
    fields: BTreeMap<&'static str, Accessor<T>>,
}

impl<T> FieldRegistry<T> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            fields: BTreeMap::new(),
        }
    }

    /// Registers a value field. The setter receives a value already coerced
    /// to `kind`; its `Err` text becomes `ConfigError::InvalidValue`.
    pub fn value(
        mut self,
        name: &'static str,
        kind: ValueKind,
        get: Getter<T>,
        set: Setter<T>,
    ) -> Self {
        self.fields.insert(name, Accessor::Value { kind, get, set });
        self
    }

    pub fn nested(
        mut self,
        name: &'static str,
        get: NestedGetter<T>,
        get_mut: NestedGetterMut<T>,
    ) -> Self {
        self.fields.insert(name, Accessor::Nested { get, get_mut });
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().map(|k| k.to_string()).collect()
    }

    fn accessor(&self, name: &str) -> Result<&Accessor<T>, ConfigError> {
        self.fields.get(name).ok_or_else(|| ConfigError::UnknownField {
            component: self.type_name.to_string(),
            field: name.to_string(),
        })
    }

    fn not_nested(&self, name: &str) -> ConfigError {
        ConfigError::NotNested {
            component: self.type_name.to_string(),
            field: name.to_string(),
        }
    }

    fn not_assignable(&self, name: &str) -> ConfigError {
        ConfigError::NotAssignable {
            component: self.type_name.to_string(),
            field: name.to_string(),
        }
    }

    pub fn value_kind(&self, name: &str) -> Result<ValueKind, ConfigError> {
        match self.accessor(name)? {
            Accessor::Value { kind, .. } => Ok(*kind),
            Accessor::Nested { .. } => Err(self.not_assignable(name)),
        }
    }

    pub fn get(&self, target: &T, name: &str) -> Result<FieldValue, ConfigError> {
        match self.accessor(name)? {
            Accessor::Value { get, .. } => Ok(get(target)),
            Accessor::Nested { .. } => Err(self.not_assignable(name)),
        }
    }

    pub fn set(&self, target: &mut T, name: &str, value: FieldValue) -> Result<(), ConfigError> {
        match self.accessor(name)? {
            Accessor::Value { kind, set, .. } => {
                let found = value.kind();
                let coerced = value
                    .coerce_to(*kind)
                    .ok_or_else(|| ConfigError::TypeMismatch {
                        component: self.type_name.to_string(),
                        field: name.to_string(),
                        expected: *kind,
                        found,
                    })?;
                set(target, coerced).map_err(|message| ConfigError::InvalidValue {
                    field: name.to_string(),
                    message,
                })
            }
            Accessor::Nested { .. } => Err(self.not_assignable(name)),
        }
    }

    pub fn get_nested<'a>(
        &self,
        target: &'a T,
        name: &str,
    ) -> Result<&'a dyn Configurable, ConfigError> {
        match self.accessor(name)? {
            Accessor::Nested { get, .. } => Ok(get(target)),
            Accessor::Value { .. } => Err(self.not_nested(name)),
        }
    }

    pub fn get_nested_mut<'a>(
        &self,
        target: &'a mut T,
        name: &str,
    ) -> Result<&'a mut dyn Configurable, ConfigError> {
        match self.accessor(name)? {
            Accessor::Nested { get_mut, .. } => Ok(get_mut(target)),
            Accessor::Value { .. } => Err(self.not_nested(name)),
        }
    }
}

/// Components with a fixed field set describe it once; [`Configurable`] is
/// then provided for them.
pub trait Reflect: Sized {
    fn registry() -> FieldRegistry<Self>;
}

impl<T: Reflect> Configurable for T {
    fn type_name(&self) -> &str {
        T::registry().type_name()
    }

    fn field_names(&self) -> Vec<String> {
        T::registry().field_names()
    }

    fn value_kind(&self, name: &str) -> Result<ValueKind, ConfigError> {
        T::registry().value_kind(name)
    }

    fn value(&self, name: &str) -> Result<FieldValue, ConfigError> {
        T::registry().get(self, name)
    }

    fn set_value(&mut self, name: &str, value: FieldValue) -> Result<(), ConfigError> {
        T::registry().set(self, name, value)
    }

    fn nested(&self, name: &str) -> Result<&dyn Configurable, ConfigError> {
        T::registry().get_nested(self, name)
    }

    fn nested_mut(&mut self, name: &str) -> Result<&mut dyn Configurable, ConfigError> {
        T::registry().get_nested_mut(self, name)
    }
}

/// A dynamic set of declared knobs. Only declared names can be read or
/// written, and a knob keeps the kind it was declared with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    values: BTreeMap<String, FieldValue>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, value: FieldValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn unknown(&self, name: &str) -> ConfigError {
        ConfigError::UnknownField {
            component: "ParamSet".to_string(),
            field: name.to_string(),
        }
    }

    // Knobs are always scalars.
    fn scalar_only(&self, name: &str) -> ConfigError {
        if self.values.contains_key(name) {
            ConfigError::NotNested {
                component: "ParamSet".to_string(),
                field: name.to_string(),
            }
        } else {
            self.unknown(name)
        }
    }
}

impl Configurable for ParamSet {
    fn type_name(&self) -> &str {
        "ParamSet"
    }

    fn field_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn value_kind(&self, name: &str) -> Result<ValueKind, ConfigError> {
        self.values
            .get(name)
            .map(FieldValue::kind)
            .ok_or_else(|| self.unknown(name))
    }

    fn value(&self, name: &str) -> Result<FieldValue, ConfigError> {
        self.values.get(name).cloned().ok_or_else(|| self.unknown(name))
    }

    fn set_value(&mut self, name: &str, value: FieldValue) -> Result<(), ConfigError> {
        let expected = self.value_kind(name)?;
        let found = value.kind();
        let coerced = value
            .coerce_to(expected)
            .ok_or_else(|| ConfigError::TypeMismatch {
                component: "ParamSet".to_string(),
                field: name.to_string(),
                expected,
                found,
            })?;
        self.values.insert(name.to_string(), coerced);
        Ok(())
    }

    fn nested(&self, name: &str) -> Result<&dyn Configurable, ConfigError> {
        Err(self.scalar_only(name))
    }

    fn nested_mut(&mut self, name: &str) -> Result<&mut dyn Configurable, ConfigError> {
        Err(self.scalar_only(name))
    }
}
