/// One recorded mutation. `old_text` occupied `offset..offset + old_text.len()`
/// before the edit; `new_text` occupies `offset..offset + new_text.len()` after
/// it.
#[derive(Clone, Debug)]
pub(crate) struct HistoryEntry {
    pub offset: usize,
    pub old_text: String,
    pub new_text: String,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Transaction {
    pub entries: Vec<HistoryEntry>,
}

/// Undo and redo stacks of transactions. Nested `start_transaction` calls
/// are folded into the outermost one; edits outside any transaction become
/// single-entry transactions of their own.
#[derive(Default)]
pub(crate) struct History {
    undo_stack: Vec<Transaction>,
    redo_stack: Vec<Transaction>,
    transaction_depth: usize,
}

impl History {
    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth
    }

    pub fn start_transaction(&mut self) {
        self.transaction_depth += 1;
        if self.transaction_depth == 1 {
            self.undo_stack.push(Transaction::default());
        }
    }

    /// Closes one level of transaction. Returns true when the outermost
    /// transaction was committed; empty transactions are discarded. The
    /// caller checks [`transaction_depth`](Self::transaction_depth) first.
    pub fn end_transaction(&mut self) -> bool {
        debug_assert!(self.transaction_depth > 0);
        self.transaction_depth -= 1;
        if self.transaction_depth == 0 {
            if self.undo_stack.last().map_or(false, |tx| tx.entries.is_empty()) {
                self.undo_stack.pop();
                return false;
            }
            true
        } else {
            false
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.redo_stack.clear();
        if self.transaction_depth == 0 {
            self.undo_stack.push(Transaction {
                entries: vec![entry],
            });
        } else {
            self.undo_stack.last_mut().unwrap().entries.push(entry);
        }
    }

    pub fn pop_undo(&mut self) -> Option<Transaction> {
        debug_assert_eq!(self.transaction_depth, 0);
        self.undo_stack.pop()
    }

    pub fn push_redo(&mut self, transaction: Transaction) {
        self.redo_stack.push(transaction);
    }

    pub fn pop_redo(&mut self) -> Option<Transaction> {
        debug_assert_eq!(self.transaction_depth, 0);
        self.redo_stack.pop()
    }

    pub fn push_undone(&mut self, transaction: Transaction) {
        self.undo_stack.push(transaction);
    }
}
