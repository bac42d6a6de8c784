//! Integrity validation run during prepare. Failures abort the prepare and
//! with it the transaction.

use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::store::records::{NodeRecord, TxId};
use crate::store::schema::SchemaRule;
use crate::store::{labels, Stores};

pub struct IntegrityValidator {
    stores: Arc<Stores>,
}

impl IntegrityValidator {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }

    /// Checks the shape of a node's label field and the inline-vs-dynamic
    /// boundary.
    pub fn validate_node_record(&self, record: &NodeRecord) -> Result<()> {
        labels::validate_label_field(record)
    }

    /// Structural well-formedness of a schema rule: it must survive the
    /// serialization it is about to be stored under.
    pub fn validate_schema_rule(&self, rule: &SchemaRule) -> Result<()> {
        let round_tripped = SchemaRule::deserialize(rule.id(), &rule.serialize())?;
        if &round_tripped != rule {
            return Err(GraphError::InvalidRecord(format!(
                "schema rule {} does not survive serialization",
                rule.id()
            )));
        }
        if let SchemaRule::UniquenessConstraint {
            id, owned_index, ..
        } = rule
        {
            if owned_index == id {
                return Err(GraphError::InvalidRecord(format!(
                    "uniqueness constraint {id} cannot own itself"
                )));
            }
        }
        Ok(())
    }

    /// Constraints that came online after this transaction started may have
    /// been violated by it; such transactions must be retried.
    pub fn validate_transaction_start_knowledge(
        &self,
        last_committed_tx_when_started: TxId,
    ) -> Result<()> {
        let latest_constraint_tx = self.stores.latest_constraint_introducing_tx();
        if latest_constraint_tx > last_committed_tx_when_started {
            return Err(GraphError::Tx(format!(
                "transaction started at {last_committed_tx_when_started} but a constraint was \
                 introduced at {latest_constraint_tx}; the transaction must be retried"
            )));
        }
        Ok(())
    }
}
