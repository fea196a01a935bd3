//! Attribute parsing for `#[luaw(...)]`.

use syn::{Attribute, Ident, LitStr};

/// Operators accepted inside `operators(...)`.
pub const OPERATORS: [&str; 8] = ["add", "sub", "mul", "div", "unm", "eq", "lt", "le"];

/// Parsed `#[luaw(...)]` attributes on a type.
#[derive(Debug, Default)]
pub struct TypeAttrs {
    /// Override name (default: Rust type name)
    pub name: Option<String>,
    /// Declared operators, in declaration order
    pub operators: Vec<Ident>,
}

/// Parsed `#[luaw(...)]` attributes on a field.
#[derive(Debug, Default)]
pub struct FieldAttrs {
    pub parent: bool,
}

impl TypeAttrs {
    /// Parse attributes from a list of `#[luaw(...)]` attributes.
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut result = Self::default();

        for attr in attrs {
            if !attr.path().is_ident("luaw") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    if value.value().is_empty() {
                        return Err(meta.error("type name must not be empty"));
                    }
                    result.name = Some(value.value());
                } else if meta.path.is_ident("operators") {
                    meta.parse_nested_meta(|op| {
                        let Some(ident) = op.path.get_ident() else {
                            return Err(op.error("expected an operator name"));
                        };
                        if !OPERATORS.contains(&ident.to_string().as_str()) {
                            return Err(op.error(format!(
                                "unknown operator `{ident}`, expected one of: {}",
                                OPERATORS.join(", ")
                            )));
                        }
                        if result.operators.iter().any(|existing| existing == ident) {
                            return Err(op.error(format!("operator `{ident}` declared twice")));
                        }
                        result.operators.push(ident.clone());
                        Ok(())
                    })?;
                } else {
                    return Err(meta.error(format!(
                        "unknown luaw attribute: {}",
                        meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                    )));
                }
                Ok(())
            })?;
        }

        Ok(result)
    }
}

impl FieldAttrs {
    /// Parse attributes from a list of `#[luaw(...)]` attributes.
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut result = Self::default();

        for attr in attrs {
            if !attr.path().is_ident("luaw") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("parent") {
                    result.parent = true;
                } else {
                    return Err(meta.error(format!(
                        "unknown luaw field attribute: {}",
                        meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                    )));
                }
                Ok(())
            })?;
        }

        Ok(result)
    }
}
