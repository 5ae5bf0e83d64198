//! Spousal edges.
//!
//! Marriages key off node identity, so no relocation ever touches them.
//! Partners may live in different trees; both trees are locked.

use super::{load_record, MutationEngine};
use crate::error::{StructuralViolation, TreeError};
use crate::types::{current_timestamp, Gender, Marriage, Node, Payload};

impl<P: Payload> MutationEngine<P> {
    /// Marry two nodes of opposite gender
    pub async fn marry(
        &self,
        a: &Node<P>,
        b: &Node<P>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Marriage, TreeError> {
        if a.id == b.id {
            return Err(StructuralViolation::SelfMarriage.into());
        }
        let _guards = self.locks.lock_all(&[a.tree_id, b.tree_id]).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let a = load_record(&mut *tx, a.tree_id, a.id).await?;
            let b = load_record(&mut *tx, b.tree_id, b.id).await?;
            if a.gender == b.gender {
                return Err(StructuralViolation::IncompatibleSpouses { gender: a.gender }.into());
            }
            let (husband, wife) = match a.gender {
                Gender::Male => (a.id, b.id),
                Gender::Female => (b.id, a.id),
            };

            let existing = tx.marriages_of(&[husband]).await?;
            if existing.iter().any(|m| m.husband == husband && m.wife == wife) {
                return Err(StructuralViolation::AlreadyMarried { husband, wife }.into());
            }

            let marriage = Marriage {
                husband,
                wife,
                metadata,
                created_at: current_timestamp(),
            };
            tx.insert_marriage(&marriage).await?;
            Ok::<_, TreeError>(marriage)
        }
        .await;

        let marriage = self.finish(tx, "marry", a.tree_id, result).await?;
        tracing::info!(husband = %marriage.husband, wife = %marriage.wife, "Married");
        Ok(marriage)
    }

    /// Remove the marriage between `a` and `b`
    pub async fn divorce(&self, a: &Node<P>, b: &Node<P>) -> Result<(), TreeError> {
        let _guards = self.locks.lock_all(&[a.tree_id, b.tree_id]).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let removed = tx.delete_marriage(&a.id, &b.id).await?;
            if removed == 0 {
                return Err(StructuralViolation::NotMarried { a: a.id, b: b.id }.into());
            }
            Ok::<_, TreeError>(())
        }
        .await;

        self.finish(tx, "divorce", a.tree_id, result).await?;
        tracing::info!(a = %a.id, b = %b.id, "Divorced");
        Ok(())
    }
}
