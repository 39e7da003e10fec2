//! The parameter store context object.

use tracing::{debug, info, warn};

use super::sync::{SyncRegistry, SyncTarget, Syncable};
use super::{encode_bool, ParamType, ParamValue, Parameter, SyncCell};
use crate::backend::KvBackend;
use crate::error::ParamError;

/// Typed access to persisted parameters plus the sync registry.
///
/// Constructed once at boot and shared by reference (usually `Arc`).
/// Missing and malformed values are not errors; backend faults are
/// returned as [`ParamError::Backend`] and are meant to be fatal.
pub struct ParameterStore {
    backend: Box<dyn KvBackend>,
    declarations: Vec<Parameter>,
    registry: SyncRegistry,
}

impl ParameterStore {
    /// Create a store without declared parameters.
    pub fn new(backend: impl KvBackend + 'static, sync_capacity: usize) -> Self {
        Self {
            backend: Box::new(backend),
            declarations: Vec::new(),
            registry: SyncRegistry::new(sync_capacity),
        }
    }

    /// Create a store with the given declarations. Call [`init`](Self::init)
    /// afterwards to seed defaults and register sync bindings.
    pub fn with_parameters(
        backend: impl KvBackend + 'static,
        sync_capacity: usize,
        parameters: impl IntoIterator<Item = Parameter>,
    ) -> Result<Self, ParamError> {
        let mut store = Self::new(backend, sync_capacity);
        for parameter in parameters {
            store.declare(parameter)?;
        }
        Ok(store)
    }

    /// Add a declaration. Names must be unique and non-empty.
    pub fn declare(&mut self, parameter: Parameter) -> Result<(), ParamError> {
        if parameter.name().is_empty() {
            return Err(ParamError::EmptyName);
        }
        if self.declared(parameter.name()).is_some() {
            return Err(ParamError::DuplicateDeclaration(parameter.name().to_string()));
        }
        self.declarations.push(parameter);
        Ok(())
    }

    /// Boot protocol: seed every declared default, then register the
    /// requested sync bindings. Seeding happens first so a binding's initial
    /// read always sees a defined value.
    ///
    /// Registration failures are logged and skipped; backend faults abort
    /// initialization.
    pub fn init(&self) -> Result<(), ParamError> {
        let mut seeded = 0;
        for parameter in &self.declarations {
            if self.ensure(parameter.name(), &parameter.default_value().encode())? {
                seeded += 1;
            }
        }

        let mut bound = 0;
        for parameter in &self.declarations {
            let Some(target) = parameter.sync_target() else {
                continue;
            };
            match self.sync_target(parameter.name(), target.clone()) {
                Ok(()) => bound += 1,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(param = parameter.name(), error = %err, "sync registration failed")
                }
            }
        }

        info!(
            declared = self.declarations.len(),
            seeded, bound, "parameter store initialized"
        );
        Ok(())
    }

    /// Declared parameters in declaration order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.declarations
    }

    /// Look up a declaration by name.
    pub fn declared(&self, name: &str) -> Option<&Parameter> {
        self.declarations.iter().find(|p| p.name() == name)
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    /// Schema listing: `name:code` pairs joined by commas, in declaration
    /// order. Empty when nothing is declared.
    pub fn describe(&self) -> String {
        self.declarations
            .iter()
            .map(|p| format!("{}:{}", p.name(), p.param_type().code()))
            .collect::<Vec<_>>()
            .join(",")
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Persisted value, or an empty string when the key was never set.
    pub fn get(&self, name: &str) -> Result<String, ParamError> {
        Ok(self.backend.get(name)?.unwrap_or_default())
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ParamError> {
        Ok(bool::decode(&self.get(name)?))
    }

    pub fn get_long(&self, name: &str) -> Result<i32, ParamError> {
        Ok(i32::decode(&self.get(name)?))
    }

    pub fn get_double(&self, name: &str) -> Result<f64, ParamError> {
        Ok(f64::decode(&self.get(name)?))
    }

    /// Current value decoded with the declared type (string when undeclared).
    pub fn get_value(&self, name: &str) -> Result<ParamValue, ParamError> {
        let ty = self
            .declared(name)
            .map(Parameter::param_type)
            .unwrap_or(ParamType::String);
        Ok(ParamValue::decode(ty, &self.get(name)?))
    }

    /// Whether a value is currently persisted under `name`.
    pub fn contains(&self, name: &str) -> Result<bool, ParamError> {
        Ok(self.backend.contains(name)?)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Persist `value` and refresh every binding of `name` before returning.
    ///
    /// Values for declared non-string parameters must use the fixed textual
    /// encoding of their type.
    pub fn set(&self, name: &str, value: &str) -> Result<(), ParamError> {
        if let Some(parameter) = self.declared(name) {
            let ty = parameter.param_type();
            if !ty.accepts(value) {
                return Err(ParamError::InvalidValue {
                    name: name.to_string(),
                    value: value.to_string(),
                    expected: ty,
                });
            }
        }

        self.backend.set(name, value)?;
        debug!(param = name, value, "parameter set");
        self.registry.refresh(name, value);
        Ok(())
    }

    pub fn set_bool(&self, name: &str, value: bool) -> Result<(), ParamError> {
        self.check_type(name, ParamType::Bool)?;
        self.set(name, encode_bool(value))
    }

    pub fn set_long(&self, name: &str, value: i32) -> Result<(), ParamError> {
        self.check_type(name, ParamType::Long)?;
        self.set(name, &value.to_string())
    }

    pub fn set_double(&self, name: &str, value: f64) -> Result<(), ParamError> {
        self.check_type(name, ParamType::Double)?;
        self.set(name, &value.to_string())
    }

    /// Write `value` only if `name` is absent. Returns whether a write
    /// occurred.
    pub fn ensure(&self, name: &str, value: &str) -> Result<bool, ParamError> {
        if self.backend.contains(name)? {
            return Ok(false);
        }
        self.set(name, value)?;
        Ok(true)
    }

    pub fn ensure_bool(&self, name: &str, value: bool) -> Result<bool, ParamError> {
        self.check_type(name, ParamType::Bool)?;
        self.ensure(name, encode_bool(value))
    }

    pub fn ensure_long(&self, name: &str, value: i32) -> Result<bool, ParamError> {
        self.check_type(name, ParamType::Long)?;
        self.ensure(name, &value.to_string())
    }

    pub fn ensure_double(&self, name: &str, value: f64) -> Result<bool, ParamError> {
        self.check_type(name, ParamType::Double)?;
        self.ensure(name, &value.to_string())
    }

    /// Erase `name`. Returns whether it existed; bindings are refreshed to
    /// the zero value only when something was erased.
    pub fn unset(&self, name: &str) -> Result<bool, ParamError> {
        if !self.backend.erase(name)? {
            return Ok(false);
        }
        debug!(param = name, "parameter unset");
        self.registry.refresh(name, "");
        Ok(true)
    }

    // ========================================================================
    // Sync registration
    // ========================================================================

    /// Bind a string cell to `name` and populate it with the current value.
    pub fn sync(&self, name: &str, cell: &SyncCell<String>) -> Result<(), ParamError> {
        self.sync_cell(name, cell)
    }

    pub fn sync_bool(&self, name: &str, cell: &SyncCell<bool>) -> Result<(), ParamError> {
        self.sync_cell(name, cell)
    }

    pub fn sync_long(&self, name: &str, cell: &SyncCell<i32>) -> Result<(), ParamError> {
        self.sync_cell(name, cell)
    }

    pub fn sync_double(&self, name: &str, cell: &SyncCell<f64>) -> Result<(), ParamError> {
        self.sync_cell(name, cell)
    }

    /// Generic form of the typed `sync` functions.
    ///
    /// The cell is populated even when registration fails (for example when
    /// the registry is full); the registration error is returned after the
    /// initial read so the caller knows future updates are not tracked.
    pub fn sync_cell<T: Syncable>(&self, name: &str, cell: &SyncCell<T>) -> Result<(), ParamError> {
        self.sync_target(name, T::into_target(cell.clone()))
    }

    fn sync_target(&self, name: &str, target: SyncTarget) -> Result<(), ParamError> {
        let registration = self
            .check_type(name, target.param_type())
            .and_then(|()| self.registry.register(name, target.clone()));

        if !name.is_empty() {
            target.apply(&self.get(name)?);
        }

        registration
    }

    fn check_type(&self, name: &str, requested: ParamType) -> Result<(), ParamError> {
        match self.declared(name) {
            Some(parameter) if parameter.param_type() != requested => {
                Err(ParamError::TypeMismatch {
                    name: name.to_string(),
                    declared: parameter.param_type(),
                    requested,
                })
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("declarations", &self.declarations)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
