// =============================================================================
// PositionStore — JSON-file position book with atomic persistence
// =============================================================================
//
// The book is held in memory behind a `parking_lot::RwLock` and persisted as
// a whole on every mutation using the atomic tmp + rename pattern, so a crash
// mid-write never corrupts the file. Closed positions are retained for
// history (soft delete).
//
// Persistence is synchronous and atomic per call; no transaction spans more
// than one mutation.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::position::model::Position;

/// Thread-safe position book backed by a JSON file.
pub struct PositionStore {
    path: PathBuf,
    book: RwLock<Vec<Position>>,
}

impl PositionStore {
    // -------------------------------------------------------------------------
    // Construction / loading
    // -------------------------------------------------------------------------

    /// Load the book from `path`. A missing file yields an empty book; a
    /// present file that fails to parse is an error (the operator must
    /// decide, we never silently discard a book).
    ///
    /// Every loaded position is normalized: invariant violations are
    /// corrected and logged, never propagated as a crash.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut book: Vec<Position> = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read position book from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse position book from {}", path.display()))?
        } else {
            Vec::new()
        };

        let mut corrected = 0usize;
        for pos in book.iter_mut() {
            if pos.normalize() {
                corrected += 1;
            }
        }
        if corrected > 0 {
            warn!(corrected, "position book loaded with corrected records");
        }

        let open = book.iter().filter(|p| !p.closed).count();
        info!(
            path = %path.display(),
            total = book.len(),
            open,
            "position book loaded"
        );

        Ok(Self {
            path,
            book: RwLock::new(book),
        })
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Write the whole book to disk atomically (tmp + rename).
    fn persist(&self, book: &[Position]) -> Result<()> {
        let content =
            serde_json::to_string_pretty(book).context("failed to serialise position book")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp book to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp book to {}", self.path.display()))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Insert a newly opened position.
    pub fn insert(&self, position: Position) -> Result<()> {
        let mut book = self.book.write();
        info!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            direction = %position.direction,
            entry_price = position.entry_price,
            quantity = position.quantity,
            leverage = position.leverage,
            "position opened"
        );
        book.push(position);
        self.persist(&book)
    }

    /// Upsert a position by `(symbol, position_id)`.
    pub fn save_position(&self, position: &Position) -> Result<()> {
        let mut book = self.book.write();
        match book
            .iter_mut()
            .find(|p| p.symbol == position.symbol && p.position_id == position.position_id)
        {
            Some(existing) => *existing = position.clone(),
            None => book.push(position.clone()),
        }
        self.persist(&book)
    }

    /// Mark a position closed with the given exit fill, if it is still open.
    pub fn mark_closed(
        &self,
        symbol: &str,
        position_id: &str,
        fill_price: f64,
        now_ms: i64,
    ) -> Result<Option<Position>> {
        let mut book = self.book.write();
        let Some(pos) = book
            .iter_mut()
            .find(|p| p.symbol == symbol && p.position_id == position_id && !p.closed)
        else {
            return Ok(None);
        };

        pos.apply_full_close(fill_price, now_ms);
        let snapshot = pos.clone();
        info!(
            symbol,
            position_id,
            exit_price = fill_price,
            realized_pnl = snapshot.realized_pnl,
            "position closed"
        );
        self.persist(&book)?;
        Ok(Some(snapshot))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Snapshot of all currently open positions.
    pub fn open_positions(&self) -> Vec<Position> {
        self.book.read().iter().filter(|p| !p.closed).cloned().collect()
    }

    /// Open positions for one symbol.
    pub fn open_by_symbol(&self, symbol: &str) -> Vec<Position> {
        self.book
            .read()
            .iter()
            .filter(|p| !p.closed && p.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Find a position (open or closed) by key.
    pub fn find(&self, symbol: &str, position_id: &str) -> Option<Position> {
        self.book
            .read()
            .iter()
            .find(|p| p.symbol == symbol && p.position_id == position_id)
            .cloned()
    }

    /// The most recent `limit` closed positions (newest close first).
    pub fn closed_history(&self, limit: usize) -> Vec<Position> {
        let book = self.book.read();
        let mut closed: Vec<Position> = book.iter().filter(|p| p.closed).cloned().collect();
        closed.sort_by_key(|p| std::cmp::Reverse(p.exit_timestamp.unwrap_or(0)));
        closed.truncate(limit);
        closed
    }
}

impl std::fmt::Debug for PositionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let book = self.book.read();
        let open = book.iter().filter(|p| !p.closed).count();
        f.debug_struct("PositionStore")
            .field("path", &self.path)
            .field("open", &open)
            .field("total", &book.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn temp_store(name: &str) -> PositionStore {
        let path = std::env::temp_dir().join(format!("boreas-store-test-{name}-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        PositionStore::load(&path).unwrap()
    }

    fn open_pos(symbol: &str) -> Position {
        Position::open(symbol, Direction::Long, 100.0, 1.0, 1, None)
    }

    #[test]
    fn missing_file_yields_empty_book() {
        let store = temp_store("empty");
        assert!(store.open_positions().is_empty());
        assert!(store.closed_history(10).is_empty());
    }

    #[test]
    fn insert_and_reload_round_trips_tracking_fields() {
        let path = std::env::temp_dir()
            .join(format!("boreas-store-test-reload-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let store = PositionStore::load(&path).unwrap();
            let mut pos = open_pos("BTC-USDT-SWAP");
            pos.high_price = Some(111.0);
            pos.low_price = Some(95.5);
            pos.ladder_closed_pct = 0.2;
            pos.realized_pnl = 3.75;
            store.insert(pos).unwrap();
        }

        let store = PositionStore::load(&path).unwrap();
        let open = store.open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].high_price, Some(111.0));
        assert_eq!(open[0].low_price, Some(95.5));
        assert_eq!(open[0].ladder_closed_pct, 0.2);
        assert_eq!(open[0].realized_pnl, 3.75);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn save_position_upserts_by_key() {
        let store = temp_store("upsert");
        let mut pos = open_pos("BTC-USDT-SWAP");
        store.insert(pos.clone()).unwrap();

        pos.ladder_closed_pct = 0.4;
        store.save_position(&pos).unwrap();

        let found = store.find(&pos.symbol, &pos.position_id).unwrap();
        assert_eq!(found.ladder_closed_pct, 0.4);
        assert_eq!(store.open_positions().len(), 1);
    }

    #[test]
    fn mark_closed_soft_deletes() {
        let store = temp_store("close");
        let pos = open_pos("ETH-USDT-SWAP");
        let key = (pos.symbol.clone(), pos.position_id.clone());
        store.insert(pos).unwrap();

        let closed = store.mark_closed(&key.0, &key.1, 110.0, 1_000).unwrap().unwrap();
        assert!(closed.closed);
        assert!((closed.realized_pnl - 10.0).abs() < 1e-9);

        assert!(store.open_positions().is_empty());
        assert_eq!(store.closed_history(10).len(), 1);

        // A second close is a no-op.
        assert!(store.mark_closed(&key.0, &key.1, 120.0, 2_000).unwrap().is_none());
    }

    #[test]
    fn open_by_symbol_filters() {
        let store = temp_store("filter");
        store.insert(open_pos("BTC-USDT-SWAP")).unwrap();
        store.insert(open_pos("ETH-USDT-SWAP")).unwrap();
        assert_eq!(store.open_by_symbol("BTC-USDT-SWAP").len(), 1);
        assert_eq!(store.open_by_symbol("SOL-USDT-SWAP").len(), 0);
    }
}
