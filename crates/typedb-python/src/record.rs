//! Member records: the typed view of a decoded database entry.
//!
//! A module file decodes to a mapping whose `members` entry maps names to
//! records. Each record is a mapping tagged by `kind`:
//!
//! ```text
//! {"kind": "type", "value": {"bases": [...], "members": {...}, "doc": ...}}
//! {"kind": "function", "value": {"overloads": [...], "builtin": True}}
//! {"kind": "moduleref", "value": ("os.path",)}
//! {"kind": "data", "value": {"type": [("builtins", "int")]}, "version": ">=3.0"}
//! ```
//!
//! Fields may also sit directly beside `kind` instead of under `value`.
//! This module turns such mappings into [`MemberRecord`] values without
//! resolving anything; resolution is the reader's job.
//!
//! Parsing is lenient at the member level: a broken nested member is reported
//! through the caller's issue list and skipped, so one bad record never hides
//! its siblings.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use typedb_core::pickle::RawValue;

// ============================================================================
// Error Types
// ============================================================================

/// A record that does not have the shape its `kind` requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record is not a mapping (found {found})")]
    NotAMapping { found: &'static str },

    #[error("record has no kind")]
    MissingKind,

    #[error("field '{field}' is required")]
    MissingField { field: &'static str },

    #[error("field '{field}' expected {expected}, found {found}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("member '{name}': {source}")]
    Member {
        name: String,
        source: Box<RecordError>,
    },
}

impl RecordError {
    fn in_member(self, name: &str) -> Self {
        RecordError::Member {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}

/// Result type for record parsing.
pub type RecordResult<T> = Result<T, RecordError>;

// ============================================================================
// Records
// ============================================================================

/// Source position of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// A reference to a type by module and name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeRef {
    /// Declaring module. `None` means the builtin module.
    pub module: Option<String>,
    /// Type name, possibly dotted for nested classes. `None` means `object`.
    pub name: Option<String>,
    /// Element types of a parameterized sequence, e.g. `list[int]`.
    pub index_types: TypeList,
}

impl TypeRef {
    pub fn new(module: Option<&str>, name: &str) -> Self {
        Self {
            module: module.map(str::to_string),
            name: Some(name.to_string()),
            index_types: Vec::new(),
        }
    }

    /// Parse the dotted form: `pkg.mod.Name`, or a bare builtin `Name`.
    pub fn from_dotted(text: &str) -> Self {
        match text.rsplit_once('.') {
            Some((module, name)) => TypeRef::new(Some(module), name),
            None => TypeRef::new(None, text),
        }
    }

    /// `module.name` for diagnostics.
    pub fn display_name(&self) -> String {
        let name = self.name.as_deref().unwrap_or("object");
        match self.module.as_deref() {
            Some(module) if !module.is_empty() => format!("{}.{}", module, name),
            _ => name.to_string(),
        }
    }
}

/// Zero or more type references. Empty means "unknown".
pub type TypeList = Vec<TypeRef>;

/// How a parameter binds arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Normal,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    KwArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub name: String,
    pub types: TypeList,
    pub default_value: Option<String>,
    pub kind: ParameterKind,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverloadRecord {
    pub doc: Option<String>,
    pub return_doc: Option<String>,
    pub params: Vec<ParameterRecord>,
    pub return_types: TypeList,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionRecord {
    pub doc: Option<String>,
    pub overloads: Vec<OverloadRecord>,
    pub is_builtin: bool,
    pub is_static: bool,
    /// Methods only: whether the method is bound to an instance.
    pub is_bound: bool,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeRecord {
    pub doc: Option<String>,
    pub bases: TypeList,
    /// Explicit linearization written by the scraper, self first.
    pub mro: Option<TypeList>,
    pub members: Vec<(String, MemberRecord)>,
    pub is_builtin: bool,
    pub is_hidden: bool,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyRecord {
    pub doc: Option<String>,
    pub types: TypeList,
    pub location: Option<Location>,
}

/// The kind-specific payload of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    Type(TypeRecord),
    Function(FunctionRecord),
    Method(FunctionRecord),
    Property(PropertyRecord),
    /// `data`/`constant`: a value of the listed types.
    Constant(TypeList),
    /// Alternative definitions of one name.
    Multiple(Vec<MemberRecord>),
    /// A reference to another module by name.
    ModuleRef(String),
    /// An alias for existing types.
    TypeRef(TypeList),
    /// A dotted path to a member defined elsewhere.
    FuncRef(String),
    /// A kind this reader does not know.
    Unknown(String),
}

/// One member record.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRecord {
    pub kind: RecordKind,
    /// Version gate, e.g. `">=3.0"`.
    pub version: Option<String>,
}

impl MemberRecord {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            version: None,
        }
    }

    /// The `kind` tag as written in the database.
    pub fn kind_name(&self) -> &str {
        match &self.kind {
            RecordKind::Type(_) => "type",
            RecordKind::Function(_) => "function",
            RecordKind::Method(_) => "method",
            RecordKind::Property(_) => "property",
            RecordKind::Constant(_) => "data",
            RecordKind::Multiple(_) => "multiple",
            RecordKind::ModuleRef(_) => "moduleref",
            RecordKind::TypeRef(_) => "typeref",
            RecordKind::FuncRef(_) => "funcref",
            RecordKind::Unknown(kind) => kind,
        }
    }

    /// Parse one record. Broken nested members go to `issues`.
    pub fn from_raw(raw: &RawValue, issues: &mut Vec<RecordError>) -> RecordResult<Self> {
        let record = raw.as_dict().ok_or(RecordError::NotAMapping {
            found: raw.type_name(),
        })?;
        let kind = match record.get("kind") {
            Some(RawValue::Str(kind)) => kind.as_str(),
            Some(other) => {
                return Err(RecordError::FieldType {
                    field: "kind",
                    expected: "str",
                    found: other.type_name(),
                })
            }
            None => return Err(RecordError::MissingKind),
        };
        let version = opt_str(record, "version")?;

        // Nested form keeps fields under `value`; flat form keeps them beside
        // `kind`.
        let value = record.get("value");
        let fields = match value {
            Some(RawValue::Dict(fields)) => fields,
            _ => record,
        };

        let kind = match kind {
            "type" => RecordKind::Type(parse_type(fields, issues)?),
            "function" => RecordKind::Function(parse_function(fields)?),
            "method" => RecordKind::Method(parse_function(fields)?),
            "property" => RecordKind::Property(PropertyRecord {
                doc: opt_str(fields, "doc")?,
                types: type_list_field(fields, "type")?,
                location: location(fields)?,
            }),
            "data" | "constant" => RecordKind::Constant(type_list_field(fields, "type")?),
            "multiple" => {
                let members = match fields.get("members") {
                    Some(members) => members.as_sequence().ok_or(RecordError::FieldType {
                        field: "members",
                        expected: "sequence",
                        found: members.type_name(),
                    })?,
                    None => return Err(RecordError::MissingField { field: "members" }),
                };
                let mut candidates = Vec::with_capacity(members.len());
                for candidate in members {
                    match MemberRecord::from_raw(candidate, issues) {
                        Ok(candidate) => candidates.push(candidate),
                        Err(err) => issues.push(err),
                    }
                }
                RecordKind::Multiple(candidates)
            }
            "moduleref" => RecordKind::ModuleRef(module_ref_name(value, fields)?),
            "typeref" => {
                let list = match value {
                    Some(RawValue::Dict(_)) | None => type_list_field(fields, "type")?,
                    Some(value) => parse_type_list(value)?,
                };
                RecordKind::TypeRef(list)
            }
            "funcref" => match opt_str(fields, "func_name")? {
                Some(path) => RecordKind::FuncRef(path),
                None => return Err(RecordError::MissingField { field: "func_name" }),
            },
            other => RecordKind::Unknown(other.to_string()),
        };

        Ok(MemberRecord { kind, version })
    }
}

/// Parse a `members` mapping. Members that fail to parse go to `issues`.
pub fn parse_members(raw: &RawValue, issues: &mut Vec<RecordError>) -> Vec<(String, MemberRecord)> {
    let Some(members) = raw.as_dict() else {
        if !raw.is_none() {
            issues.push(RecordError::FieldType {
                field: "members",
                expected: "dict",
                found: raw.type_name(),
            });
        }
        return Vec::new();
    };
    let mut out = Vec::with_capacity(members.len());
    for (name, record) in members {
        match MemberRecord::from_raw(record, issues) {
            Ok(record) => out.push((name.clone(), record)),
            Err(err) => issues.push(err.in_member(name)),
        }
    }
    out
}

// ============================================================================
// Kind Parsers
// ============================================================================

fn parse_type(
    fields: &BTreeMap<String, RawValue>,
    issues: &mut Vec<RecordError>,
) -> RecordResult<TypeRecord> {
    let members = match fields.get("members") {
        Some(raw) => parse_members(raw, issues),
        None => Vec::new(),
    };
    let mro = match fields.get("mro") {
        None | Some(RawValue::None) => None,
        Some(raw) => Some(parse_type_list(raw)?),
    };
    Ok(TypeRecord {
        doc: opt_str(fields, "doc")?,
        bases: type_list_field(fields, "bases")?,
        mro,
        members,
        is_builtin: flag(fields, "builtin")?,
        is_hidden: flag(fields, "is_hidden")?,
        location: location(fields)?,
    })
}

fn parse_function(fields: &BTreeMap<String, RawValue>) -> RecordResult<FunctionRecord> {
    let overloads = match fields.get("overloads") {
        None | Some(RawValue::None) => {
            let implicit = ["args", "ret_type", "return_doc"]
                .iter()
                .any(|key| fields.contains_key(*key));
            if implicit {
                vec![parse_overload(fields)?]
            } else {
                Vec::new()
            }
        }
        Some(raw) => {
            let items = raw.as_sequence().ok_or(RecordError::FieldType {
                field: "overloads",
                expected: "sequence",
                found: raw.type_name(),
            })?;
            let mut overloads = Vec::with_capacity(items.len());
            for item in items {
                let overload = item.as_dict().ok_or(RecordError::FieldType {
                    field: "overloads",
                    expected: "dict",
                    found: item.type_name(),
                })?;
                overloads.push(parse_overload(overload)?);
            }
            overloads
        }
    };
    Ok(FunctionRecord {
        doc: opt_str(fields, "doc")?,
        overloads,
        is_builtin: flag(fields, "builtin")?,
        is_static: flag(fields, "static")?,
        is_bound: flag(fields, "bound")?,
        location: location(fields)?,
    })
}

fn parse_overload(fields: &BTreeMap<String, RawValue>) -> RecordResult<OverloadRecord> {
    let params = match fields.get("args") {
        None | Some(RawValue::None) => Vec::new(),
        Some(raw) => {
            let items = raw.as_sequence().ok_or(RecordError::FieldType {
                field: "args",
                expected: "sequence",
                found: raw.type_name(),
            })?;
            items.iter().map(parse_parameter).collect::<RecordResult<_>>()?
        }
    };
    Ok(OverloadRecord {
        doc: opt_str(fields, "doc")?,
        return_doc: opt_str(fields, "return_doc")?,
        params,
        return_types: type_list_field(fields, "ret_type")?,
    })
}

fn parse_parameter(raw: &RawValue) -> RecordResult<ParameterRecord> {
    let fields = raw.as_dict().ok_or(RecordError::FieldType {
        field: "args",
        expected: "dict",
        found: raw.type_name(),
    })?;
    let kind = match opt_str(fields, "arg_format")?.as_deref() {
        Some("*") => ParameterKind::VarArgs,
        Some("**") => ParameterKind::KwArgs,
        _ => ParameterKind::Normal,
    };
    Ok(ParameterRecord {
        name: opt_str(fields, "name")?.unwrap_or_default(),
        types: type_list_field(fields, "type")?,
        default_value: opt_str(fields, "default_value")?,
        kind,
    })
}

fn module_ref_name(
    value: Option<&RawValue>,
    fields: &BTreeMap<String, RawValue>,
) -> RecordResult<String> {
    let name = match value {
        Some(RawValue::Str(name)) => Some(name.clone()),
        Some(RawValue::Tuple(items)) | Some(RawValue::List(items)) => {
            items.first().and_then(RawValue::as_str).map(str::to_string)
        }
        _ => opt_str(fields, "module_name")?,
    };
    match name {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(RecordError::MissingField {
            field: "module_name",
        }),
    }
}

// ============================================================================
// Type References
// ============================================================================

/// Parse a type list.
///
/// A tuple is one reference, a list is a list of references (nested lists
/// are flattened), a string is a dotted reference, and none is empty.
pub fn parse_type_list(raw: &RawValue) -> RecordResult<TypeList> {
    let mut out = Vec::new();
    collect_type_refs(raw, &mut out)?;
    Ok(out)
}

fn collect_type_refs(raw: &RawValue, out: &mut TypeList) -> RecordResult<()> {
    match raw {
        RawValue::None => {}
        RawValue::Str(text) => out.push(TypeRef::from_dotted(text)),
        RawValue::Tuple(items) => out.push(parse_type_tuple(items)?),
        RawValue::List(items) => {
            for item in items {
                collect_type_refs(item, out)?;
            }
        }
        other => {
            return Err(RecordError::FieldType {
                field: "type",
                expected: "type reference",
                found: other.type_name(),
            })
        }
    }
    Ok(())
}

fn parse_type_tuple(items: &[RawValue]) -> RecordResult<TypeRef> {
    if items.len() < 2 {
        return Err(RecordError::FieldType {
            field: "type",
            expected: "(module, name) tuple",
            found: "short tuple",
        });
    }
    let part = |value: &RawValue| -> RecordResult<Option<String>> {
        match value {
            RawValue::None => Ok(None),
            RawValue::Str(s) if s.is_empty() => Ok(None),
            RawValue::Str(s) => Ok(Some(s.clone())),
            other => Err(RecordError::FieldType {
                field: "type",
                expected: "str",
                found: other.type_name(),
            }),
        }
    };
    let index_types = match items.get(2) {
        Some(raw) => parse_type_list(raw)?,
        None => Vec::new(),
    };
    Ok(TypeRef {
        module: part(&items[0])?,
        name: part(&items[1])?,
        index_types,
    })
}

// ============================================================================
// Field Helpers
// ============================================================================

fn opt_str(
    fields: &BTreeMap<String, RawValue>,
    field: &'static str,
) -> RecordResult<Option<String>> {
    match fields.get(field) {
        None | Some(RawValue::None) => Ok(None),
        Some(RawValue::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(RecordError::FieldType {
            field,
            expected: "str",
            found: other.type_name(),
        }),
    }
}

fn flag(fields: &BTreeMap<String, RawValue>, field: &'static str) -> RecordResult<bool> {
    match fields.get(field) {
        None | Some(RawValue::None) => Ok(false),
        Some(value) => value.as_bool().ok_or(RecordError::FieldType {
            field,
            expected: "bool",
            found: value.type_name(),
        }),
    }
}

fn type_list_field(
    fields: &BTreeMap<String, RawValue>,
    field: &'static str,
) -> RecordResult<TypeList> {
    match fields.get(field) {
        None => Ok(Vec::new()),
        Some(raw) => parse_type_list(raw).map_err(|err| match err {
            RecordError::FieldType {
                expected, found, ..
            } => RecordError::FieldType {
                field,
                expected,
                found,
            },
            other => other,
        }),
    }
}

/// `location` is a `(line, column)` pair. Anything else is ignored.
fn location(fields: &BTreeMap<String, RawValue>) -> RecordResult<Option<Location>> {
    let Some(pair) = fields.get("location").and_then(RawValue::as_sequence) else {
        return Ok(None);
    };
    match pair {
        [line, column] => {
            let line = line.as_int().and_then(|v| u32::try_from(v).ok());
            let column = column.as_int().and_then(|v| u32::try_from(v).ok());
            Ok(line.zip(column).map(|(line, column)| Location { line, column }))
        }
        _ => Ok(None),
    }
}
