use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Position of a lazy pagination.
///
/// Owned by exactly one iteration; the offset only ever moves forward by
/// `page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    offset: u64,
    page_size: u64,
}

impl PageCursor {
    pub fn new(page_size: u64) -> Result<Self> {
        Self::starting_at(0, page_size)
    }

    pub fn starting_at(offset: u64, page_size: u64) -> Result<Self> {
        if page_size == 0 {
            return Err(PipelineError::Config("page_size must be positive".into()));
        }
        Ok(Self { offset, page_size })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Move to the next page.
    pub fn advance(&mut self) -> Result<()> {
        self.offset = self
            .offset
            .checked_add(self.page_size)
            .ok_or_else(|| PipelineError::InvalidState("page offset overflow".into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_page_size_rejected() {
        assert!(matches!(PageCursor::new(0), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut cursor = PageCursor::new(5).unwrap();
        cursor.advance().unwrap();
        cursor.advance().unwrap();
        assert_eq!(cursor.offset(), 10);
        assert_eq!(cursor.page_size(), 5);
    }

    #[test]
    fn test_advance_overflow() {
        let mut cursor = PageCursor::starting_at(u64::MAX - 1, 5).unwrap();
        assert!(cursor.advance().is_err());
    }
}
