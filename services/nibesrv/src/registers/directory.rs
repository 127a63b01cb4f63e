//! Register catalogue lookup by name and by address

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{Register, RegisterSize};

/// Catalogues compiled into the binary, keyed by model name
pub const BUILTIN_MODELS: &[(&str, &str)] = &[(
    "f370_f470",
    include_str!("../../registers/f370_f470.csv"),
)];

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("no register named '{0}'")]
    UnknownName(String),

    #[error("no register at address {0}")]
    UnknownAddress(u16),

    #[error("unknown heat pump model '{0}' (built-in models: {1})")]
    UnknownModel(String, String),

    #[error("register catalogue: {0}")]
    Csv(#[from] csv::Error),

    #[error("register catalogue {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("register catalogue row {row}: {reason}")]
    InvalidRecord { row: usize, reason: String },

    #[error("duplicate register {0}")]
    Duplicate(String),
}

/// One catalogue row: `address,name,title,size,factor,unit,writable,mappings`
///
/// `mappings` is written as `0=ECONOMY;1=NORMAL;2=LUXURY`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRecord {
    pub address: u16,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub size: RegisterSize,
    #[serde(default)]
    pub factor: Option<u32>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub writable: Option<bool>,
    #[serde(default)]
    pub mappings: Option<String>,
}

impl RegisterRecord {
    fn into_register(self, row: usize) -> Result<Register, DirectoryError> {
        if self.name.trim().is_empty() {
            return Err(DirectoryError::InvalidRecord {
                row,
                reason: "empty register name".to_string(),
            });
        }
        if self.factor == Some(0) {
            return Err(DirectoryError::InvalidRecord {
                row,
                reason: "factor must be at least 1".to_string(),
            });
        }

        let mut mappings = BTreeMap::new();
        for entry in self
            .mappings
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
        {
            let (raw, label) = entry.split_once('=').ok_or_else(|| DirectoryError::InvalidRecord {
                row,
                reason: format!("mapping '{}' is not raw=label", entry),
            })?;
            let raw: i64 = raw.trim().parse().map_err(|_| DirectoryError::InvalidRecord {
                row,
                reason: format!("mapping key '{}' is not an integer", raw),
            })?;
            mappings.insert(raw, label.trim().to_string());
        }

        let name = self.name.trim().to_string();
        Ok(Register {
            address: self.address,
            title: self.title.unwrap_or_else(|| name.clone()),
            name,
            size: self.size,
            factor: self.factor.unwrap_or(1),
            unit: self.unit.filter(|unit| !unit.is_empty()),
            writable: self.writable.unwrap_or(false),
            mappings,
        })
    }
}

/// Immutable register catalogue for one heat pump model
#[derive(Debug, Default)]
pub struct RegisterDirectory {
    model: String,
    by_address: HashMap<u16, Arc<Register>>,
    by_name: HashMap<String, Arc<Register>>,
}

impl RegisterDirectory {
    /// Build a directory from registers, rejecting duplicate names or addresses
    pub fn from_registers(
        model: impl Into<String>,
        registers: impl IntoIterator<Item = Register>,
    ) -> Result<Self, DirectoryError> {
        let mut directory = Self {
            model: model.into(),
            ..Default::default()
        };
        for register in registers {
            let register = Arc::new(register);
            if directory.by_address.contains_key(&register.address) {
                return Err(DirectoryError::Duplicate(format!(
                    "address {}",
                    register.address
                )));
            }
            if directory.by_name.contains_key(&register.name) {
                return Err(DirectoryError::Duplicate(format!("name {}", register.name)));
            }
            directory
                .by_name
                .insert(register.name.clone(), Arc::clone(&register));
            directory.by_address.insert(register.address, register);
        }
        Ok(directory)
    }

    /// Parse a CSV catalogue
    pub fn from_csv_reader<R: Read>(
        model: impl Into<String>,
        reader: R,
    ) -> Result<Self, DirectoryError> {
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut registers = Vec::new();
        for (index, record) in csv.deserialize::<RegisterRecord>().enumerate() {
            // header is row 1
            registers.push(record?.into_register(index + 2)?);
        }
        Self::from_registers(model, registers)
    }

    /// Load a CSV catalogue from disk
    pub fn from_path(model: impl Into<String>, path: &Path) -> Result<Self, DirectoryError> {
        let file = std::fs::File::open(path).map_err(|source| DirectoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let directory = Self::from_csv_reader(model, file)?;
        debug!(
            "Loaded {} registers from {}",
            directory.len(),
            path.display()
        );
        Ok(directory)
    }

    /// Load one of the catalogues compiled into the binary
    pub fn builtin(model: &str) -> Result<Self, DirectoryError> {
        let (_, catalogue) = BUILTIN_MODELS
            .iter()
            .find(|(name, _)| *name == model)
            .ok_or_else(|| {
                let known: Vec<&str> = BUILTIN_MODELS.iter().map(|(name, _)| *name).collect();
                DirectoryError::UnknownModel(model.to_string(), known.join(", "))
            })?;
        Self::from_csv_reader(model, catalogue.as_bytes())
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<Register>, DirectoryError> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownName(name.to_string()))
    }

    pub fn by_address(&self, address: u16) -> Result<Arc<Register>, DirectoryError> {
        self.by_address
            .get(&address)
            .cloned()
            .ok_or(DirectoryError::UnknownAddress(address))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
