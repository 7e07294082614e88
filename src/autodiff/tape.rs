//! Adept-style two-stack tape for reverse-mode AD over dual numbers.
//!
//! Stores precomputed partial derivatives (multipliers) and operand indices during the
//! forward pass. The reverse sweep is a single multiply-accumulate loop with zero-adjoint
//! skipping, no opcode dispatch. Multipliers and adjoints are [`Dual`] numbers, which turns
//! the sweep into a forward-over-reverse pass.

use super::{Dual, Float};

/// Sentinel index indicating a constant (not recorded on tape).
pub const CONSTANT: u32 = u32::MAX;

/// A recorded operation: its result lives at `lhs_index`, and its operands'
/// multipliers/indices span `[prev.end_plus_one .. self.end_plus_one)`.
#[derive(Clone, Copy, Debug)]
struct Statement {
    lhs_index: u32,
    end_plus_one: u32,
}

/// Records the operations of one evaluation.
#[derive(Debug)]
pub struct Tape<F: Float> {
    statements: Vec<Statement>,
    multipliers: Vec<Dual<F>>,
    indices: Vec<u32>,
    num_variables: u32,
}

impl<F: Float> Default for Tape<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> Tape<F> {
    /// Create an empty tape.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a tape with pre-allocated capacity.
    pub fn with_capacity(est_ops: usize) -> Self {
        let mut statements = Vec::with_capacity(est_ops + 1);
        // Sentinel statement at index 0 so that `statements[i-1].end_plus_one`
        // is always valid for i >= 1.
        statements.push(Statement {
            lhs_index: 0,
            end_plus_one: 0,
        });
        Tape {
            statements,
            multipliers: Vec::with_capacity(est_ops * 2),
            indices: Vec::with_capacity(est_ops * 2),
            num_variables: 0,
        }
    }

    /// Number of slots (inputs and intermediate results) allocated so far.
    pub fn num_variables(&self) -> usize {
        self.num_variables as usize
    }

    /// Register a new independent variable and return its index.
    ///
    /// No statement is pushed for input variables: they are leaf nodes
    /// whose adjoints must survive the reverse sweep.
    #[inline]
    pub fn new_variable(&mut self) -> u32 {
        let idx = self.num_variables;
        self.num_variables += 1;
        idx
    }

    /// Record a unary operation `result = f(operand)` with `multiplier = df/d(operand)`.
    #[inline]
    pub fn push_unary(&mut self, operand_idx: u32, multiplier: Dual<F>) -> u32 {
        let result_idx = self.num_variables;
        self.num_variables += 1;

        if operand_idx != CONSTANT {
            self.multipliers.push(multiplier);
            self.indices.push(operand_idx);
        }

        self.statements.push(Statement {
            lhs_index: result_idx,
            end_plus_one: self.multipliers.len() as u32,
        });
        result_idx
    }

    /// Record a binary operation with precomputed partial derivatives.
    #[inline]
    pub fn push_binary(
        &mut self,
        lhs_idx: u32,
        lhs_mult: Dual<F>,
        rhs_idx: u32,
        rhs_mult: Dual<F>,
    ) -> u32 {
        let result_idx = self.num_variables;
        self.num_variables += 1;

        if lhs_idx != CONSTANT {
            self.multipliers.push(lhs_mult);
            self.indices.push(lhs_idx);
        }
        if rhs_idx != CONSTANT {
            self.multipliers.push(rhs_mult);
            self.indices.push(rhs_idx);
        }

        self.statements.push(Statement {
            lhs_index: result_idx,
            end_plus_one: self.multipliers.len() as u32,
        });
        result_idx
    }

    /// Run the reverse sweep, seeding the adjoint of `seed_index` with 1.
    /// Returns the full adjoint vector.
    ///
    /// # Panics
    /// Panics if `seed_index` is [`CONSTANT`] or out of range.
    pub fn reverse(&self, seed_index: u32) -> Vec<Dual<F>> {
        assert!(
            (seed_index as usize) < self.num_variables as usize,
            "reverse sweep seeded with an index ({seed_index}) that is not on the tape"
        );
        let mut adjoints = vec![Dual::zero(); self.num_variables as usize];
        adjoints[seed_index as usize] = Dual::one();

        for i in (1..self.statements.len()).rev() {
            let stmt = self.statements[i];
            let a = adjoints[stmt.lhs_index as usize];
            if !a.is_zero() {
                adjoints[stmt.lhs_index as usize] = Dual::zero();
                let start = self.statements[i - 1].end_plus_one as usize;
                let end = stmt.end_plus_one as usize;
                for j in start..end {
                    let target = self.indices[j] as usize;
                    adjoints[target] += self.multipliers[j] * a;
                }
            }
        }
        adjoints
    }
}

/// Access the active tape for the current thread. Panics if no tape is active.
#[inline]
pub fn with_active_tape<F: Float, R>(f: impl FnOnce(&mut Tape<F>) -> R) -> R {
    F::tape_slot().with(|slot| {
        let mut slot = slot.borrow_mut();
        let tape = slot
            .as_mut()
            .expect("No active tape. Record differentiable operations inside `autodiff::record`.");
        f(tape)
    })
}

/// Restores the previously active tape when dropped, including during unwinding.
struct TapeGuard<F: Float> {
    prev: Option<Option<Tape<F>>>,
}

impl<F: Float> TapeGuard<F> {
    fn activate(tape: Tape<F>) -> Self {
        let prev = F::tape_slot().with(|slot| slot.replace(Some(tape)));
        TapeGuard { prev: Some(prev) }
    }

    fn finish(mut self) -> Tape<F> {
        let prev = self.prev.take().unwrap_or_default();
        F::tape_slot()
            .with(|slot| slot.replace(prev))
            .expect("active tape removed during recording")
    }
}

impl<F: Float> Drop for TapeGuard<F> {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            F::tape_slot().with(|slot| {
                slot.replace(prev);
            });
        }
    }
}

/// Run `body` with a fresh tape active on this thread and return the finished tape
/// together with the body's result.
///
/// Any tape that was active before the call is restored afterwards, so recordings nest.
pub fn record<F, R, B>(body: B) -> (Tape<F>, R)
where
    F: Float,
    B: FnOnce() -> R,
{
    let guard = TapeGuard::activate(Tape::new());
    let result = body();
    (guard.finish(), result)
}
