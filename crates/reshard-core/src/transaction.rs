//! Per-session guard that keeps a transaction inside one logical schema.

use reshard_proto::KernelSqlError;

/// Binds an open transaction to the first schema it touches.
///
/// One guard belongs to one client session.
#[derive(Debug, Default)]
pub struct TransactionSchemaGuard {
    active: bool,
    bound_schema: Option<String>,
}

impl TransactionSchemaGuard {
    /// Create a guard with no open transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction. A nested begin keeps the existing binding.
    pub fn begin(&mut self) {
        self.active = true;
    }

    /// Whether a transaction is open.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Schema the open transaction is bound to.
    pub fn bound_schema(&self) -> Option<&str> {
        self.bound_schema.as_deref()
    }

    /// Admit an operation on `schema_name`.
    ///
    /// Outside a transaction every schema is allowed.
    pub fn check(&mut self, schema_name: &str) -> Result<(), KernelSqlError> {
        if !self.active {
            return Ok(());
        }
        match &self.bound_schema {
            Some(bound) if bound != schema_name => Err(KernelSqlError::CrossSchemaTransaction {
                bound_schema: bound.clone(),
                requested_schema: schema_name.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.bound_schema = Some(schema_name.to_string());
                Ok(())
            }
        }
    }

    /// Close the transaction after a commit.
    pub fn commit(&mut self) {
        self.reset();
    }

    /// Close the transaction after a rollback.
    pub fn rollback(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.active = false;
        self.bound_schema = None;
    }
}
