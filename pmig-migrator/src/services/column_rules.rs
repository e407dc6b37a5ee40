//! Header normalization and dynamic column classification
//!
//! Header names are normalized (case, accents, whitespace, aliases) before any
//! row is built. Dynamic columns are then classified once per header set using
//! a prefix rule table; the first matching rule wins.

use crate::models::raw_row::columns;
use serde::{Deserialize, Serialize};

/// Values meaning "not applicable" (compared trimmed, case-insensitive)
const NOT_APPLICABLE: [&str; 6] = ["", "na", "n/a", "no aplica", "no_aplica", "-"];

/// Alias → canonical column name (applied after normalization)
const HEADER_ALIASES: &[(&str, &str)] = &[
    ("correo", "email"),
    ("correo_electronico", "email"),
    ("e_mail", "email"),
    ("mail", "email"),
    ("clave_cct", "cct"),
    ("cct_escuela", "cct"),
    ("clave_del_centro_de_trabajo", "cct"),
    ("id_participante", "id"),
    ("participante_id", "id"),
    ("id_externo", "id"),
    ("ciclo", "ciclo_escolar"),
    ("periodo", "periodo_de_implementacion"),
    ("periodo_implementacion", "periodo_de_implementacion"),
    ("programa_educativo", "programa"),
    ("nombre_programa", "programa"),
    ("implementacion_programa", "implementacion"),
    ("nombres", "nombre"),
    ("primer_apellido", "apellido_paterno"),
    ("segundo_apellido", "apellido_materno"),
    ("genero", "sexo"),
    ("celular", "telefono"),
    ("nombre_cct", "nombre_escuela"),
];

/// Kind of dynamic column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// `modalidad_<field>` companion of an attendance field
    Modality,
    Attendance,
    Work,
    Module,
    Survey,
}

/// Prefix rule table, first match wins
pub const COLUMN_RULES: &[(&str, FieldKind)] = &[
    (columns::MODALITY_PREFIX, FieldKind::Modality),
    ("asist_", FieldKind::Attendance),
    ("trip", FieldKind::Attendance),
    ("ses", FieldKind::Attendance),
    ("trabajo", FieldKind::Work),
    ("evidencia", FieldKind::Work),
    ("modulo_", FieldKind::Module),
    ("encuesta_", FieldKind::Survey),
];

/// Modules created for every implementation
pub const FIXED_MODULES: [&str; 3] = ["modulo_1", "modulo_2", "modulo_3"];

/// Survey identifiers preloaded before implementations are created
pub const FIXED_SURVEYS: [&str; 3] =
    ["encuesta_inicial", "encuesta_final", "encuesta_satisfaccion"];

pub fn is_not_applicable(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    NOT_APPLICABLE.contains(&value.as_str())
}

fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

/// Normalize a header name
///
/// Trim, drop a UTF-8 BOM, lowercase, fold Spanish accents, turn runs of
/// whitespace / `-` / `.` into a single `_`, then resolve aliases.
pub fn normalize_header(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for ch in raw.trim().trim_start_matches('\u{feff}').chars() {
        if ch.is_whitespace() || ch == '-' || ch == '.' || ch == '_' {
            pending_separator = !normalized.is_empty();
            continue;
        }
        if pending_separator {
            normalized.push('_');
            pending_separator = false;
        }
        for lower in ch.to_lowercase() {
            normalized.push(fold_accent(lower));
        }
    }

    HEADER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(normalized)
}

/// Classify one normalized column name
pub fn classify(column: &str) -> Option<FieldKind> {
    COLUMN_RULES
        .iter()
        .find(|(prefix, _)| column.starts_with(prefix))
        .map(|(_, kind)| *kind)
}

/// Companion modality column of an attendance field
pub fn modality_column(field: &str) -> String {
    format!("{}{}", columns::MODALITY_PREFIX, field)
}

/// Classified dynamic columns of one header set, in header order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub attendance_fields: Vec<String>,
    pub work_fields: Vec<String>,
    pub module_fields: Vec<String>,
    pub survey_fields: Vec<String>,
    pub modality_fields: Vec<String>,
}

impl ColumnLayout {
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Self {
        let mut layout = Self::default();
        for header in headers {
            let column = header.as_ref();
            let target = match classify(column) {
                Some(FieldKind::Attendance) => &mut layout.attendance_fields,
                Some(FieldKind::Work) => &mut layout.work_fields,
                Some(FieldKind::Module) => &mut layout.module_fields,
                Some(FieldKind::Survey) => &mut layout.survey_fields,
                Some(FieldKind::Modality) => &mut layout.modality_fields,
                None => continue,
            };
            if !target.iter().any(|c| c == column) {
                target.push(column.to_string());
            }
        }
        layout
    }

    /// Whether the header set has a modality companion for `field`
    pub fn has_modality(&self, field: &str) -> bool {
        let column = modality_column(field);
        self.modality_fields.iter().any(|c| *c == column)
    }
}
