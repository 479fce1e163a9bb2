use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The tagged schema term a caller declares per profile field. Wrappers (`Optional`,
/// `WithDefault`, `Nullable`) are transparent for nullability detection and enum folding.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
	String,
	Number,
	Boolean,
	Null,
	Any,
	Enumeration { variants: Vec<String> },
	Array { element: Box<FieldType> },
	Object { fields: BTreeMap<String, FieldType> },
	Record { value: Box<FieldType> },
	Optional { inner: Box<FieldType> },
	WithDefault { inner: Box<FieldType>, default: Value },
	Nullable { inner: Box<FieldType> },
	Union { variants: Vec<FieldType> },
}
impl FieldType {
	pub fn optional(inner: FieldType) -> Self {
		Self::Optional { inner: Box::new(inner) }
	}

	pub fn nullable(inner: FieldType) -> Self {
		Self::Nullable { inner: Box::new(inner) }
	}

	pub fn array(element: FieldType) -> Self {
		Self::Array { element: Box::new(element) }
	}

	pub fn record(value: FieldType) -> Self {
		Self::Record { value: Box::new(value) }
	}

	pub fn enumeration<I, S>(variants: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::Enumeration { variants: variants.into_iter().map(Into::into).collect() }
	}

	/// Whether `null` is an acceptable value for this type.
	pub fn is_nullable(&self) -> bool {
		match self {
			Self::Null | Self::Any => true,
			Self::Nullable { .. } => true,
			Self::Optional { inner } | Self::WithDefault { inner, .. } => inner.is_nullable(),
			Self::Union { variants } => variants.iter().any(FieldType::is_nullable),
			_ => false,
		}
	}

	/// Normalizes string enumeration values to their declared spelling, matching
	/// case-insensitively. Unknown object keys pass through unchanged.
	pub fn fold_enum_case(&self, value: Value) -> Value {
		match self {
			Self::Enumeration { variants } => {
				let Value::String(raw) = &value else {
					return value;
				};
				let Some(declared) =
					variants.iter().find(|variant| variant.eq_ignore_ascii_case(raw))
				else {
					return value;
				};

				Value::String(declared.clone())
			},
			Self::Optional { inner } | Self::WithDefault { inner, .. } | Self::Nullable { inner } =>
				inner.fold_enum_case(value),
			Self::Union { variants } =>
				variants.iter().fold(value, |folded, branch| branch.fold_enum_case(folded)),
			Self::Array { element } => {
				let Value::Array(items) = value else {
					return value;
				};

				Value::Array(items.into_iter().map(|item| element.fold_enum_case(item)).collect())
			},
			Self::Object { fields } => {
				let Value::Object(mut map) = value else {
					return value;
				};

				for (name, field_type) in fields {
					if let Some(existing) = map.remove(name) {
						map.insert(name.clone(), field_type.fold_enum_case(existing));
					}
				}

				Value::Object(map)
			},
			Self::Record { value: value_type } => {
				let Value::Object(map) = value else {
					return value;
				};

				Value::Object(
					map.into_iter().map(|(k, v)| (k, value_type.fold_enum_case(v))).collect(),
				)
			},
			_ => value,
		}
	}

	/// Validates a non-null candidate value against the declared type. `null` is screened by
	/// the nullability rule before validation, so it only reaches here nested inside
	/// containers.
	pub fn validate(&self, value: &Value, path: &str) -> Result<(), Violation> {
		match self {
			Self::String =>
				if value.is_string() {
					Ok(())
				} else {
					Err(Violation::new(path, "string", value))
				},
			Self::Number =>
				if value.is_number() {
					Ok(())
				} else {
					Err(Violation::new(path, "number", value))
				},
			Self::Boolean =>
				if value.is_boolean() {
					Ok(())
				} else {
					Err(Violation::new(path, "boolean", value))
				},
			Self::Null =>
				if value.is_null() {
					Ok(())
				} else {
					Err(Violation::new(path, "null", value))
				},
			Self::Any => Ok(()),
			Self::Enumeration { variants } => {
				let Value::String(raw) = value else {
					return Err(Violation::new(path, &self.describe(), value));
				};

				if variants.iter().any(|variant| variant == raw) {
					Ok(())
				} else {
					Err(Violation::new(path, &self.describe(), value))
				}
			},
			Self::Array { element } => {
				let Value::Array(items) = value else {
					return Err(Violation::new(path, &self.describe(), value));
				};

				for (idx, item) in items.iter().enumerate() {
					element.validate(item, &format!("{path}[{idx}]"))?;
				}

				Ok(())
			},
			Self::Object { fields } => {
				let Value::Object(map) = value else {
					return Err(Violation::new(path, &self.describe(), value));
				};

				for (name, field_type) in fields {
					let child_path = format!("{path}.{name}");

					match map.get(name) {
						Some(child) if child.is_null() =>
							if !field_type.is_nullable() {
								return Err(Violation::new(
									&child_path,
									&field_type.describe(),
									child,
								));
							},
						Some(child) => field_type.validate(child, &child_path)?,
						None =>
							if !field_type.is_omittable() {
								return Err(Violation::missing(&child_path, &field_type.describe()));
							},
					}
				}

				Ok(())
			},
			Self::Record { value: value_type } => {
				let Value::Object(map) = value else {
					return Err(Violation::new(path, &self.describe(), value));
				};

				for (key, child) in map {
					let child_path = format!("{path}.{key}");

					if child.is_null() {
						if !value_type.is_nullable() {
							return Err(Violation::new(&child_path, &value_type.describe(), child));
						}
					} else {
						value_type.validate(child, &child_path)?;
					}
				}

				Ok(())
			},
			Self::Optional { inner } | Self::WithDefault { inner, .. } =>
				inner.validate(value, path),
			Self::Nullable { inner } =>
				if value.is_null() {
					Ok(())
				} else {
					inner.validate(value, path)
				},
			Self::Union { variants } => {
				if variants.iter().any(|branch| branch.validate(value, path).is_ok()) {
					return Ok(());
				}

				Err(Violation::new(path, &self.describe(), value))
			},
		}
	}

	/// Compact structural descriptor used by the extractor prompt.
	pub fn describe(&self) -> String {
		match self {
			Self::String => "string".to_string(),
			Self::Number => "number".to_string(),
			Self::Boolean => "boolean".to_string(),
			Self::Null => "null".to_string(),
			Self::Any => "any".to_string(),
			Self::Enumeration { variants } => format!("enum({})", variants.join("|")),
			Self::Array { element } => format!("array<{}>", element.describe()),
			Self::Object { fields } => {
				let inner = fields
					.iter()
					.map(|(name, field_type)| format!("{name}: {}", field_type.describe()))
					.collect::<Vec<_>>()
					.join(", ");

				format!("object{{{inner}}}")
			},
			Self::Record { value } => format!("record<{}>", value.describe()),
			Self::Optional { inner } => format!("{}?", inner.describe()),
			Self::WithDefault { inner, .. } => inner.describe(),
			Self::Nullable { inner } => format!("{}|null", inner.describe()),
			Self::Union { variants } =>
				variants.iter().map(FieldType::describe).collect::<Vec<_>>().join("|"),
		}
	}

	fn is_omittable(&self) -> bool {
		match self {
			Self::Optional { .. } | Self::WithDefault { .. } | Self::Any => true,
			Self::Nullable { inner } => inner.is_omittable(),
			Self::Union { variants } => variants.iter().any(FieldType::is_omittable),
			_ => false,
		}
	}

	fn unwrapped(&self) -> &FieldType {
		match self {
			Self::Optional { inner } | Self::WithDefault { inner, .. } | Self::Nullable { inner } =>
				inner.unwrapped(),
			other => other,
		}
	}

	fn check_declaration(&self, path: &str) -> Result<(), String> {
		match self {
			Self::Enumeration { variants } => {
				if variants.is_empty() {
					return Err(format!("{path}: enumeration must declare at least one variant."));
				}
				if variants.iter().any(|variant| variant.trim().is_empty()) {
					return Err(format!("{path}: enumeration variants must be non-empty."));
				}

				Ok(())
			},
			Self::Array { element } => element.check_declaration(&format!("{path}[]")),
			Self::Object { fields } => {
				for (name, field_type) in fields {
					if name.trim().is_empty() {
						return Err(format!("{path}: object field names must be non-empty."));
					}

					field_type.check_declaration(&format!("{path}.{name}"))?;
				}

				Ok(())
			},
			Self::Record { value } => value.check_declaration(&format!("{path}.*")),
			Self::Optional { inner } | Self::WithDefault { inner, .. } | Self::Nullable { inner } =>
				inner.check_declaration(path),
			Self::Union { variants } => {
				if variants.is_empty() {
					return Err(format!("{path}: union must declare at least one branch."));
				}

				for branch in variants {
					branch.check_declaration(path)?;
				}

				Ok(())
			},
			_ => Ok(()),
		}
	}
}

/// Structured diagnostic detail attached to a `schema_invalid` rejection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Violation {
	pub path: String,
	pub expected: String,
	pub found: String,
}
impl Violation {
	fn new(path: &str, expected: &str, value: &Value) -> Self {
		Self { path: path.to_string(), expected: expected.to_string(), found: type_name(value) }
	}

	fn missing(path: &str, expected: &str) -> Self {
		Self { path: path.to_string(), expected: expected.to_string(), found: "missing".to_string() }
	}
}
impl fmt::Display for Violation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} expected {}, found {}", self.path, self.expected, self.found)
	}
}

/// The caller-declared fact sheet shape: field name to schema term. Field names are the
/// exact profile keys; the optional free-form map must be named `extras`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProfileSchema {
	pub fields: BTreeMap<String, FieldType>,
}
impl ProfileSchema {
	pub const EXTRAS_FIELD: &'static str = "extras";

	pub fn new(fields: BTreeMap<String, FieldType>) -> Self {
		Self { fields }
	}

	pub fn field(&self, name: &str) -> Option<&FieldType> {
		self.fields.get(name)
	}

	pub fn declares(&self, name: &str) -> bool {
		self.fields.contains_key(name)
	}

	pub fn declares_extras(&self) -> bool {
		self.fields.contains_key(Self::EXTRAS_FIELD)
	}

	pub fn is_nullable(&self, name: &str) -> bool {
		self.fields.get(name).map(FieldType::is_nullable).unwrap_or(false)
	}

	/// Registration-time sanity check. Failures are programming errors, not data errors.
	pub fn check_declaration(&self) -> Result<(), String> {
		if self.fields.is_empty() {
			return Err("schema must declare at least one field.".to_string());
		}

		for (name, field_type) in &self.fields {
			if !is_identifier(name) {
				return Err(format!("field name {name:?} must be a bare identifier."));
			}

			field_type.check_declaration(name)?;
		}

		if let Some(extras) = self.fields.get(Self::EXTRAS_FIELD)
			&& !matches!(extras.unwrapped(), FieldType::Record { .. } | FieldType::Any)
		{
			return Err("the extras field must be declared as a record or any type.".to_string());
		}

		Ok(())
	}

	/// Projects the schema to the compact structural map embedded in the extractor prompt.
	pub fn descriptor(&self) -> Value {
		Value::Object(
			self.fields
				.iter()
				.map(|(name, field_type)| (name.clone(), Value::String(field_type.describe())))
				.collect(),
		)
	}
}

fn is_identifier(name: &str) -> bool {
	let mut chars = name.chars();

	match chars.next() {
		Some(first) if first.is_ascii_alphabetic() || first == '_' => {},
		_ => return false,
	}

	chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn type_name(value: &Value) -> String {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
	.to_string()
}
