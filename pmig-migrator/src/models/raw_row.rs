//! Raw participant row
//!
//! One record of the participant dataset keyed by normalized column name.
//! Built once by the analysis phase and only read afterwards.

use crate::services::column_rules::is_not_applicable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalized column names used directly by the pipeline
pub mod columns {
    pub const ID: &str = "id";
    pub const EMAIL: &str = "email";
    pub const CCT: &str = "cct";
    pub const PROGRAM: &str = "programa";
    pub const IMPLEMENTATION: &str = "implementacion";
    pub const CYCLE: &str = "ciclo_escolar";
    pub const PERIOD: &str = "periodo_de_implementacion";
    pub const FIRST_NAME: &str = "nombre";
    pub const PATERNAL_SURNAME: &str = "apellido_paterno";
    pub const MATERNAL_SURNAME: &str = "apellido_materno";
    pub const SEX: &str = "sexo";
    pub const AGE: &str = "edad";
    pub const CURP: &str = "curp";
    pub const PHONE: &str = "telefono";
    pub const ROLE: &str = "rol";
    pub const APP_MINUTES: &str = "minutos_app";
    pub const APP_DOWNLOAD: &str = "descarga_app";
    pub const MODALITY_PREFIX: &str = "modalidad_";
}

/// Participant row keyed by normalized column name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// Line number in the source file (header is line 1)
    pub row_number: u64,
    fields: HashMap<String, String>,
}

impl RawRow {
    /// Build from parallel header / value slices
    ///
    /// When several headers normalize to the same column, the first non-empty
    /// value is kept.
    pub fn from_pairs<'a, I>(row_number: u64, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut fields: HashMap<String, String> = HashMap::new();
        for (column, value) in pairs {
            let slot = fields.entry(column.to_string()).or_default();
            if slot.is_empty() {
                *slot = value.trim().to_string();
            }
        }
        Self { row_number, fields }
    }

    /// Trimmed value, empty strings treated as absent
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Value that is present and not a "not applicable" sentinel
    pub fn value(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|v| !is_not_applicable(v))
    }

    /// Value for payloads: sentinels and absent values become empty
    pub fn text(&self, column: &str) -> String {
        self.value(column).unwrap_or_default().to_string()
    }

    /// Truthy flag (`1`, `si`, `sí`, `true`, `x`, `yes`)
    pub fn flag(&self, column: &str) -> bool {
        self.value(column).is_some_and(is_truthy)
    }

    pub fn external_id(&self) -> Option<&str> {
        self.value(columns::ID)
    }

    pub fn email(&self) -> Option<&str> {
        self.value(columns::EMAIL)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "si" | "sí" | "true" | "x" | "yes" | "verdadero"
    )
}
