//! Keyset-paginated iteration over entities written by one changeset.

use onestop_core::{ChangesetId, EntityId};

use crate::{StoreError, StoredEntity, VersionedEntityRepository};

/// Largest batch read or written at once during provenance recording.
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Walks the current rows written by a changeset in id order, one bounded
/// batch at a time.
///
/// The cursor only remembers the last id it returned, so it can be resumed
/// from [`ChangesetEntityCursor::position`] after an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangesetEntityCursor {
    changeset_id: ChangesetId,
    after: EntityId,
    batch_size: usize,
}

impl ChangesetEntityCursor {
    /// Cursor at the start of `changeset_id`'s rows.
    ///
    /// `batch_size` is clamped to `1..=MAX_BATCH_SIZE`.
    pub fn new(changeset_id: ChangesetId, batch_size: usize) -> Self {
        Self {
            changeset_id,
            after: 0,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Continue after entity `id`.
    #[must_use]
    pub const fn resume_after(mut self, id: EntityId) -> Self {
        self.after = id;
        self
    }

    /// Id of the last row returned.
    pub const fn position(&self) -> EntityId {
        self.after
    }

    /// Effective batch size.
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Next batch, or `None` once exhausted.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the page query fails.
    pub fn next_batch(
        &mut self,
        repository: &VersionedEntityRepository<'_>,
    ) -> Result<Option<Vec<StoredEntity>>, StoreError> {
        let batch =
            repository.created_or_updated_in(self.changeset_id, self.after, self.batch_size)?;
        match batch.last() {
            Some(last) => {
                self.after = last.id;
                Ok(Some(batch))
            }
            None => Ok(None),
        }
    }
}
