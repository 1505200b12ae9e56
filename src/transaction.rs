use crate::dialect::Dialect;

/// Per-builder transaction nesting state.
///
/// Depth 0 means no open transaction. Depth `n > 0` maps to savepoint names
/// `LEVEL{n}`: the outermost `start` issues a native BEGIN, every nested
/// `start` a savepoint, and commit/rollback unwind symmetrically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionState {
    pub level: u32,
    pub in_progress: bool,
}

/// What a transaction step must execute against the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAction {
    Begin,
    Commit,
    Rollback,
    /// Execute the carried SQL (savepoint handling).
    Exec(String),
    /// Nothing to run (savepoint auto-release on SQL Server).
    Noop,
}

fn savepoint_name(level: u32) -> String {
    format!("LEVEL{level}")
}

impl TransactionState {
    /// Plan the next `start_transaction` step and advance the state.
    pub fn start(&mut self, dialect: Dialect) -> TxAction {
        let action = if self.level == 0 {
            TxAction::Begin
        } else {
            TxAction::Exec(dialect.savepoint_sql(&savepoint_name(self.level)))
        };
        self.level += 1;
        self.in_progress = true;
        action
    }

    /// Plan the next `commit` step. Returns `None` at level 0 (the
    /// fail-silently contract: callers surface `false`, not an error).
    pub fn commit(&mut self, dialect: Dialect) -> Option<TxAction> {
        if self.level == 0 {
            return None;
        }
        self.level -= 1;
        if self.level == 0 {
            self.in_progress = false;
            Some(TxAction::Commit)
        } else {
            match dialect.release_savepoint_sql(&savepoint_name(self.level)) {
                Some(sql) => Some(TxAction::Exec(sql)),
                None => Some(TxAction::Noop),
            }
        }
    }

    /// Plan the next `rollback` step. Returns `None` at level 0.
    pub fn rollback(&mut self, dialect: Dialect) -> Option<TxAction> {
        if self.level == 0 {
            return None;
        }
        self.level -= 1;
        if self.level == 0 {
            self.in_progress = false;
            Some(TxAction::Rollback)
        } else {
            Some(TxAction::Exec(
                dialect.rollback_savepoint_sql(&savepoint_name(self.level)),
            ))
        }
    }

    /// Force the state back to no-transaction (shutdown cleanup).
    pub fn force_reset(&mut self) {
        self.level = 0;
        self.in_progress = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_start_commit_issues_one_begin_one_commit() {
        let mut state = TransactionState::default();
        let dialect = Dialect::MySql;

        let mut actions = Vec::new();
        for _ in 0..3 {
            actions.push(state.start(dialect));
        }
        for _ in 0..3 {
            actions.push(state.commit(dialect).unwrap());
        }

        assert_eq!(
            actions,
            vec![
                TxAction::Begin,
                TxAction::Exec("SAVEPOINT LEVEL1".to_string()),
                TxAction::Exec("SAVEPOINT LEVEL2".to_string()),
                TxAction::Exec("RELEASE SAVEPOINT LEVEL2".to_string()),
                TxAction::Exec("RELEASE SAVEPOINT LEVEL1".to_string()),
                TxAction::Commit,
            ]
        );
        assert_eq!(state.level, 0);
        assert!(!state.in_progress);
    }

    #[test]
    fn nested_rollback_targets_savepoints() {
        let mut state = TransactionState::default();
        let dialect = Dialect::Postgres;

        state.start(dialect);
        state.start(dialect);
        assert_eq!(
            state.rollback(dialect),
            Some(TxAction::Exec("ROLLBACK TO SAVEPOINT LEVEL1".to_string()))
        );
        assert_eq!(state.rollback(dialect), Some(TxAction::Rollback));
    }

    #[test]
    fn commit_and_rollback_fail_silently_at_level_zero() {
        let mut state = TransactionState::default();
        assert_eq!(state.commit(Dialect::MySql), None);
        assert_eq!(state.rollback(Dialect::MySql), None);
    }

    #[test]
    fn mssql_release_is_a_noop() {
        let mut state = TransactionState::default();
        state.start(Dialect::Mssql);
        state.start(Dialect::Mssql);
        assert_eq!(state.commit(Dialect::Mssql), Some(TxAction::Noop));
        assert_eq!(state.commit(Dialect::Mssql), Some(TxAction::Commit));
    }
}
