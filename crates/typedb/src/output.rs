//! JSON output types for the typedb CLI.
//!
//! Every command prints exactly one JSON object to stdout. Successful
//! responses carry `status: "ok"` and the schema version; failures carry
//! `status: "error"` and an [`ErrorInfo`] whose `code` matches the process
//! exit code.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use typedb_core::error::{OutputErrorCode, TypeDbError};
use typedb_core::pickle::RawValue;
use typedb_python::members::{PythonFunction, PythonParameter};
use typedb_python::record::{Location, ParameterKind};
use typedb_python::{CorruptionReport, FixupStats, Member, MemberKind, PythonType};

/// Version of the JSON output schema.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Member Views
// ============================================================================

/// A type named by its qualified name.
pub fn type_names(types: &[Arc<PythonType>]) -> Vec<String> {
    types.iter().map(|ty| ty.qualified_name()).collect()
}

/// One member in a listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberSummary {
    pub name: String,
    pub kind: MemberKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterView {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub types: Vec<String>,
}

impl From<&PythonParameter> for ParameterView {
    fn from(param: &PythonParameter) -> Self {
        ParameterView {
            name: param.name().to_string(),
            kind: param.kind(),
            default: param.default_value().map(str::to_string),
            types: type_names(&param.types()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OverloadView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub parameters: Vec<ParameterView>,
    pub returns: Vec<String>,
}

/// Full detail for one member. Fields that do not apply to the member's
/// kind are omitted.
#[derive(Debug, Clone, Serialize)]
pub struct MemberDetail {
    pub name: String,
    pub kind: MemberKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mro: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overloads: Vec<OverloadView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<MemberKind>,
}

impl MemberDetail {
    fn bare(name: &str, member: &Member) -> Self {
        MemberDetail {
            name: name.to_string(),
            kind: member.kind(),
            doc: member.doc().map(str::to_string),
            location: member.location(),
            qualified_name: None,
            bases: Vec::new(),
            mro: Vec::new(),
            members: Vec::new(),
            overloads: Vec::new(),
            types: Vec::new(),
            candidates: Vec::new(),
        }
    }

    /// Describe `member`, reachable as `name` in its container.
    pub fn describe(name: &str, member: &Member) -> Self {
        let mut detail = MemberDetail::bare(name, member);
        match member {
            Member::Type(ty) => {
                detail.qualified_name = Some(ty.qualified_name());
                detail.bases = type_names(&ty.bases());
                detail.mro = type_names(&ty.mro());
                detail.members = ty.member_names();
            }
            Member::Function(function) => detail.overloads = overloads(function),
            Member::Method(method) => detail.overloads = overloads(method.function()),
            Member::Property(property) => detail.types = type_names(&property.types()),
            Member::Constant(constant) => detail.types = type_names(&constant.types()),
            Member::Module(module) => detail.qualified_name = Some(module.name().to_string()),
            Member::Multiple(multiple) => {
                detail.candidates = multiple.members().iter().map(Member::kind).collect();
            }
            Member::Unknown(_) => {}
        }
        detail
    }
}

fn overloads(function: &PythonFunction) -> Vec<OverloadView> {
    function
        .overloads()
        .iter()
        .map(|overload| OverloadView {
            doc: overload.doc().map(str::to_string),
            parameters: overload.parameters().iter().map(ParameterView::from).collect(),
            returns: type_names(&overload.return_types()),
        })
        .collect()
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub loaded: bool,
}

/// Response for `typedb modules`.
#[derive(Debug, Clone, Serialize)]
pub struct ModulesResponse {
    pub status: String,
    pub schema_version: String,
    pub modules: Vec<ModuleSummary>,
}

impl ModulesResponse {
    pub fn new(modules: Vec<ModuleSummary>) -> Self {
        ModulesResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            modules,
        }
    }
}

/// Response for `typedb show MODULE`.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleResponse {
    pub status: String,
    pub schema_version: String,
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    pub members: Vec<MemberSummary>,
}

/// Response for `typedb show MODULE MEMBER`.
#[derive(Debug, Clone, Serialize)]
pub struct MemberResponse {
    pub status: String,
    pub schema_version: String,
    pub module: String,
    pub member: MemberDetail,
}

impl MemberResponse {
    pub fn new(module: impl Into<String>, member: MemberDetail) -> Self {
        MemberResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            module: module.into(),
            member,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CorruptionView {
    pub module: String,
    pub path: PathBuf,
    pub reason: String,
}

impl From<&CorruptionReport> for CorruptionView {
    fn from(report: &CorruptionReport) -> Self {
        CorruptionView {
            module: report.module.clone(),
            path: report.path.clone(),
            reason: report.reason.clone(),
        }
    }
}

/// Response for `typedb check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub status: String,
    pub schema_version: String,
    pub language_version: String,
    pub version_current: bool,
    pub regenerating: bool,
    pub modules: usize,
    pub fixups: FixupStats,
    pub unresolved_module_refs: usize,
    pub corrupt: Vec<CorruptionView>,
}

impl CheckResponse {
    /// Whether any module failed to decode.
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty()
    }
}

/// Response for `typedb dump FILE`.
#[derive(Debug, Clone, Serialize)]
pub struct DumpResponse {
    pub status: String,
    pub schema_version: String,
    pub file: PathBuf,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub value: Option<RawValue>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    /// Numeric error code, also the process exit code.
    pub code: u8,
    pub message: String,
}

impl ErrorInfo {
    pub fn from_error(err: &TypeDbError) -> Self {
        ErrorInfo {
            code: OutputErrorCode::from(err).code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub schema_version: String,
    pub error: ErrorInfo,
}

impl ErrorResponse {
    pub fn from_error(err: &TypeDbError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

/// Emit a response as pretty-printed JSON.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Tests
// ============================================================================
