//! Builtin type identifiers.
//!
//! Builtin types are looked up by id rather than by name because several of
//! them are spelled differently between 2.x and 3.x (`long`, `unicode`,
//! `bytes`).

use serde::Serialize;
use typedb_core::version::LanguageVersion;

/// Name of the builtin module for a language version.
pub fn builtin_module_name(version: LanguageVersion) -> &'static str {
    if version.is_3x() {
        "builtins"
    } else {
        "__builtin__"
    }
}

/// The 2.x builtin module name, which 3.x databases fall back to.
pub const LEGACY_BUILTIN_MODULE: &str = "__builtin__";

/// Well-known builtin types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BuiltinTypeId {
    Unknown,
    Object,
    Type,
    NoneType,
    Bool,
    Int,
    Long,
    Float,
    Complex,
    Str,
    Unicode,
    Bytes,
    Tuple,
    List,
    Dict,
    Set,
    FrozenSet,
    Function,
    BuiltinFunction,
    BuiltinMethodDescriptor,
    Generator,
    Module,
    Ellipsis,
    Property,
    ClassMethod,
    StaticMethod,
    DictKeys,
    DictValues,
    DictItems,
    ListIterator,
    TupleIterator,
    SetIterator,
    StrIterator,
    UnicodeIterator,
    BytesIterator,
    CallableIterator,
}

impl BuiltinTypeId {
    /// Every id except `Unknown`, in lookup priority order.
    pub const ALL: [BuiltinTypeId; 35] = [
        BuiltinTypeId::Object,
        BuiltinTypeId::Type,
        BuiltinTypeId::NoneType,
        BuiltinTypeId::Bool,
        BuiltinTypeId::Int,
        BuiltinTypeId::Long,
        BuiltinTypeId::Float,
        BuiltinTypeId::Complex,
        BuiltinTypeId::Str,
        BuiltinTypeId::Unicode,
        BuiltinTypeId::Bytes,
        BuiltinTypeId::Tuple,
        BuiltinTypeId::List,
        BuiltinTypeId::Dict,
        BuiltinTypeId::Set,
        BuiltinTypeId::FrozenSet,
        BuiltinTypeId::Function,
        BuiltinTypeId::BuiltinFunction,
        BuiltinTypeId::BuiltinMethodDescriptor,
        BuiltinTypeId::Generator,
        BuiltinTypeId::Module,
        BuiltinTypeId::Ellipsis,
        BuiltinTypeId::Property,
        BuiltinTypeId::ClassMethod,
        BuiltinTypeId::StaticMethod,
        BuiltinTypeId::DictKeys,
        BuiltinTypeId::DictValues,
        BuiltinTypeId::DictItems,
        BuiltinTypeId::ListIterator,
        BuiltinTypeId::TupleIterator,
        BuiltinTypeId::SetIterator,
        BuiltinTypeId::StrIterator,
        BuiltinTypeId::UnicodeIterator,
        BuiltinTypeId::BytesIterator,
        BuiltinTypeId::CallableIterator,
    ];

    /// Name of the type in the builtin module, or `None` for `Unknown`.
    pub fn type_name(self, version: LanguageVersion) -> Option<&'static str> {
        let py3 = version.is_3x();
        let name = match self {
            BuiltinTypeId::Unknown => return None,
            BuiltinTypeId::Object => "object",
            BuiltinTypeId::Type => "type",
            BuiltinTypeId::NoneType => "NoneType",
            BuiltinTypeId::Bool => "bool",
            BuiltinTypeId::Int => "int",
            BuiltinTypeId::Long => {
                if py3 {
                    "int"
                } else {
                    "long"
                }
            }
            BuiltinTypeId::Float => "float",
            BuiltinTypeId::Complex => "complex",
            BuiltinTypeId::Str => "str",
            BuiltinTypeId::Unicode => {
                if py3 {
                    "str"
                } else {
                    "unicode"
                }
            }
            BuiltinTypeId::Bytes => {
                if py3 {
                    "bytes"
                } else {
                    "str"
                }
            }
            BuiltinTypeId::Tuple => "tuple",
            BuiltinTypeId::List => "list",
            BuiltinTypeId::Dict => "dict",
            BuiltinTypeId::Set => "set",
            BuiltinTypeId::FrozenSet => "frozenset",
            BuiltinTypeId::Function => "function",
            BuiltinTypeId::BuiltinFunction => "builtin_function",
            BuiltinTypeId::BuiltinMethodDescriptor => "builtin_method_descriptor",
            BuiltinTypeId::Generator => "generator",
            BuiltinTypeId::Module => "module_type",
            BuiltinTypeId::Ellipsis => "ellipsis",
            BuiltinTypeId::Property => "property",
            BuiltinTypeId::ClassMethod => "classmethod",
            BuiltinTypeId::StaticMethod => "staticmethod",
            BuiltinTypeId::DictKeys => "dict_keys",
            BuiltinTypeId::DictValues => "dict_values",
            BuiltinTypeId::DictItems => "dict_items",
            BuiltinTypeId::ListIterator => "list_iterator",
            BuiltinTypeId::TupleIterator => "tuple_iterator",
            BuiltinTypeId::SetIterator => "set_iterator",
            BuiltinTypeId::StrIterator => "str_iterator",
            BuiltinTypeId::UnicodeIterator => {
                if py3 {
                    "str_iterator"
                } else {
                    "unicode_iterator"
                }
            }
            BuiltinTypeId::BytesIterator => {
                if py3 {
                    "bytes_iterator"
                } else {
                    "str_iterator"
                }
            }
            BuiltinTypeId::CallableIterator => "callable_iterator",
        };
        Some(name)
    }

    /// Reverse of [`type_name`](Self::type_name). Names shared by two ids
    /// resolve to the one listed first in [`ALL`](Self::ALL).
    pub fn from_type_name(name: &str, version: LanguageVersion) -> BuiltinTypeId {
        Self::ALL
            .into_iter()
            .find(|id| id.type_name(version) == Some(name))
            .unwrap_or(BuiltinTypeId::Unknown)
    }
}
