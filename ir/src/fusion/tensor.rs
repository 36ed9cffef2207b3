//! Tensors: construction, tensor ops and scheduling calls.
//!
//! Tensor ops create a fresh output tensor whose root axes mirror the
//! operands' (rfactor-or-root, reductions dropped) axes position by position.
//! Scheduling calls (`split`, `merge`, `reorder`, ...) only rewrite the leaf
//! domain of the tensor they are applied to; the transforms they record are
//! shared history visible to every analysis.

use smallvec::SmallVec;
use snafu::ensure;

use super::{AxisId, Expr, Fusion, TensorDomain, ValId, ValKind};
use crate::error::*;
use crate::types::{BinaryOp, ConstValue, DataType, IterType, MemoryType, ParallelType, TernaryOp, UnaryOp};

/// Highest tensor rank lowering supports.
pub const MAX_TENSOR_RANK: usize = 8;

/// Tensor payload of a fusion value.
#[derive(Debug, Clone)]
pub struct TensorView {
    pub(crate) domain: TensorDomain,
    pub(crate) memory_type: MemoryType,
    pub(crate) compute_at_pos: usize,
}

impl TensorView {
    pub fn domain(&self) -> &TensorDomain {
        &self.domain
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// Number of outer leaf axes shared with the consumer's loop nest.
    pub fn compute_at_pos(&self) -> usize {
        self.compute_at_pos
    }

    pub fn leaf(&self) -> &[AxisId] {
        self.domain.leaf()
    }
}

impl Fusion {
    pub fn tensor_view(&self, v: ValId) -> Result<&TensorView> {
        self.tensor_or_err(v)
    }

    /// Tensor with static extents.
    pub fn tensor(&mut self, extents: &[i64], dtype: DataType) -> Result<ValId> {
        let extents: Vec<ValId> = extents.iter().map(|&e| self.int(e)).collect();
        self.tensor_from_extents(&extents, dtype)
    }

    /// Tensor whose extents are free scalars, to be bound at evaluation time.
    pub fn symbolic_tensor(&mut self, rank: usize, dtype: DataType) -> Result<ValId> {
        let extents: Vec<ValId> = (0..rank).map(|_| self.new_scalar(DataType::Int64)).collect();
        self.tensor_from_extents(&extents, dtype)
    }

    pub fn tensor_from_extents(&mut self, extents: &[ValId], dtype: DataType) -> Result<ValId> {
        let root: Vec<AxisId> = extents.iter().map(|&extent| self.new_axis().extent(extent).call()).collect();
        self.push_tensor(root, dtype)
    }

    fn push_tensor(&mut self, root: Vec<AxisId>, dtype: DataType) -> Result<ValId> {
        ensure!(root.len() <= MAX_TENSOR_RANK, RankTooLargeSnafu { rank: root.len(), max: MAX_TENSOR_RANK });
        let tv = TensorView { domain: TensorDomain::new(root), memory_type: MemoryType::Local, compute_at_pos: 0 };
        Ok(self.push_val(ValKind::Tensor(tv), dtype))
    }

    /// Axes a consumer sees when reading `v`: rfactor-or-root without reductions.
    pub fn producer_axes(&self, v: ValId) -> Result<Vec<AxisId>> {
        let tv = self.tensor_or_err(v)?;
        Ok(self.no_reductions(tv.domain.maybe_rfactor()))
    }

    /// Create the output of an elementwise op over `operands`.
    ///
    /// Position `i` of the output copies the extent of the first non-broadcast
    /// operand axis at `i`, and is a broadcast only if every operand is.
    fn elementwise_output(&mut self, operands: &[ValId], dtype: DataType) -> Result<ValId> {
        let mut per_operand: Vec<Vec<AxisId>> = Vec::new();
        for &v in operands {
            if self.val(v).is_tensor() {
                per_operand.push(self.producer_axes(v)?);
            }
        }
        let rank = per_operand.first().map_or(0, Vec::len);
        for axes in per_operand.iter().skip(1) {
            ensure!(axes.len() == rank, OperandRankMismatchSnafu { lhs: rank, rhs: axes.len() });
        }

        let mut root = Vec::with_capacity(rank);
        for pos in 0..rank {
            let real = per_operand.iter().map(|axes| axes[pos]).find(|&a| !self.axis(a).is_broadcast());
            let axis = match real {
                Some(a) => {
                    let extent = self.axis(a).extent;
                    self.new_axis().extent(extent).call()
                }
                None => {
                    let extent = self.axis(per_operand[0][pos]).extent;
                    self.new_axis().extent(extent).iter_type(IterType::Broadcast).call()
                }
            };
            root.push(axis);
        }
        self.push_tensor(root, dtype)
    }

    fn any_tensor(&self, operands: &[ValId]) -> bool {
        operands.iter().any(|&v| self.val(v).is_tensor())
    }

    pub fn unary(&mut self, op: UnaryOp, input: ValId) -> Result<ValId> {
        if !self.any_tensor(&[input]) {
            return self.scalar_unary(op, input);
        }
        let dtype = self.val(input).dtype;
        let out = self.elementwise_output(&[input], dtype)?;
        self.push_expr(Expr::Unary { op, out, input });
        Ok(out)
    }

    /// Copy of `input` into a fresh tensor.
    pub fn set(&mut self, input: ValId) -> Result<ValId> {
        self.unary(UnaryOp::Set, input)
    }

    /// Elementwise binary op; either operand may be a scalar.
    pub fn binary(&mut self, op: BinaryOp, lhs: ValId, rhs: ValId) -> Result<ValId> {
        if !self.any_tensor(&[lhs, rhs]) {
            return self.scalar_binary(op, lhs, rhs);
        }
        let dtype = if op.is_comparison() { DataType::Bool } else { self.val(lhs).dtype };
        let out = self.elementwise_output(&[lhs, rhs], dtype)?;
        self.push_expr(Expr::Binary { op, out, lhs, rhs });
        Ok(out)
    }

    pub fn add(&mut self, lhs: ValId, rhs: ValId) -> Result<ValId> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValId, rhs: ValId) -> Result<ValId> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    /// `cond ? a : b`, elementwise.
    pub fn where_(&mut self, cond: ValId, a: ValId, b: ValId) -> Result<ValId> {
        let dtype = self.val(a).dtype;
        let out = if self.any_tensor(&[cond, a, b]) {
            self.elementwise_output(&[cond, a, b], dtype)?
        } else {
            self.new_scalar(dtype)
        };
        self.push_expr(Expr::Ternary { op: TernaryOp::Where, out, a: cond, b: a, c: b });
        Ok(out)
    }

    /// Reduce `input` over `axes` (positions in its producer axes; negative
    /// positions count from the end) with the combining operator `op`.
    pub fn reduction(&mut self, op: BinaryOp, input: ValId, axes: &[i64]) -> Result<ValId> {
        ensure!(op.is_reduction_op(), InvalidReductionOpSnafu { op });
        ensure!(!axes.is_empty(), EmptyReductionSnafu { tensor: input });
        let in_axes = self.producer_axes(input)?;
        let rank = in_axes.len();
        let mut reduced = vec![false; rank];
        for &pos in axes {
            let resolved = if pos < 0 { pos + rank as i64 } else { pos };
            ensure!(
                (0..rank as i64).contains(&resolved),
                AxisPositionOutOfRangeSnafu { tensor: input, pos, rank }
            );
            reduced[resolved as usize] = true;
        }

        let root: Vec<AxisId> = in_axes
            .iter()
            .zip(&reduced)
            .map(|(&a, &is_reduced)| {
                let src = self.axis(a);
                let iter_type = if is_reduced { IterType::Reduction } else { src.iter_type };
                let extent = src.extent;
                self.new_axis().extent(extent).iter_type(iter_type).call()
            })
            .collect();
        let dtype = self.val(input).dtype;
        let out = self.push_tensor(root, dtype)?;
        let init = self.reduction_init(op, dtype);
        self.push_expr(Expr::Reduction { op, init, out, input });
        tracing::trace!(%input, %out, %op, ?axes, "reduction");
        Ok(out)
    }

    pub fn sum(&mut self, input: ValId, axes: &[i64]) -> Result<ValId> {
        self.reduction(BinaryOp::Add, input, axes)
    }

    fn reduction_init(&mut self, op: BinaryOp, dtype: DataType) -> ValId {
        let value = match (op, dtype.is_float()) {
            (BinaryOp::Mul, false) => ConstValue::Int(1),
            (BinaryOp::Mul, true) => ConstValue::Float(1.0),
            (BinaryOp::Max, false) => ConstValue::Int(i64::MIN),
            (BinaryOp::Max, true) => ConstValue::Float(f64::NEG_INFINITY),
            (BinaryOp::Min, false) => ConstValue::Int(i64::MAX),
            (BinaryOp::Min, true) => ConstValue::Float(f64::INFINITY),
            (_, false) => ConstValue::Int(0),
            (_, true) => ConstValue::Float(0.0),
        };
        self.push_val(ValKind::Scalar { value: Some(value) }, dtype)
    }

    /// Insert broadcast axes where `flags` is set. The number of unset flags
    /// must equal the input's producer rank.
    pub fn broadcast(&mut self, input: ValId, flags: &[bool]) -> Result<ValId> {
        let in_axes = self.producer_axes(input)?;
        let kept = flags.iter().filter(|&&f| !f).count();
        ensure!(kept == in_axes.len(), BroadcastFlagsMismatchSnafu { flags: flags.to_vec(), rank: in_axes.len() });

        let mut sources = in_axes.iter().copied();
        let mut root = Vec::with_capacity(flags.len());
        for &is_new in flags {
            let source = if is_new { None } else { sources.next() };
            let axis = match source {
                Some(src) => {
                    let (extent, iter_type) = (self.axis(src).extent, self.axis(src).iter_type);
                    self.new_axis().extent(extent).iter_type(iter_type).call()
                }
                None => {
                    let one = self.int(1);
                    self.new_axis().extent(one).iter_type(IterType::Broadcast).call()
                }
            };
            root.push(axis);
        }
        let dtype = self.val(input).dtype;
        let out = self.push_tensor(root, dtype)?;
        self.push_expr(Expr::Broadcast { out, input, flags: SmallVec::from_slice(flags) });
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    fn leaf_position(&self, tv: ValId, pos: i64) -> Result<usize> {
        let rank = self.tensor_or_err(tv)?.domain.rank();
        let resolved = if pos < 0 { pos + rank as i64 } else { pos };
        ensure!((0..rank as i64).contains(&resolved), AxisPositionOutOfRangeSnafu { tensor: tv, pos, rank });
        Ok(resolved as usize)
    }

    /// Leaf axis of `tv` at `pos`; negative positions count from the end.
    pub fn axis_at(&self, tv: ValId, pos: i64) -> Result<AxisId> {
        let pos = self.leaf_position(tv, pos)?;
        Ok(self.tensor_or_err(tv)?.domain.leaf[pos])
    }

    /// Split leaf axis `pos` of `tv` by a constant factor.
    pub fn split(&mut self, tv: ValId, pos: i64, factor: i64, inner_split: bool) -> Result<(AxisId, AxisId)> {
        let factor = self.int(factor);
        self.split_by(tv, pos, factor, inner_split, None, None)
    }

    /// Split that only covers `[start_offset, extent - stop_offset)` of a root axis.
    pub fn partial_split(
        &mut self,
        tv: ValId,
        pos: i64,
        factor: i64,
        start_offset: i64,
        stop_offset: i64,
    ) -> Result<(AxisId, AxisId)> {
        let factor = self.int(factor);
        let start = self.int(start_offset);
        let stop = self.int(stop_offset);
        self.split_by(tv, pos, factor, true, Some(start), Some(stop))
    }

    pub fn split_by(
        &mut self,
        tv: ValId,
        pos: i64,
        factor: ValId,
        inner_split: bool,
        start_offset: Option<ValId>,
        stop_offset: Option<ValId>,
    ) -> Result<(AxisId, AxisId)> {
        let pos = self.leaf_position(tv, pos)?;
        let axis = self.tensor_or_err(tv)?.domain.leaf[pos];
        let (outer, inner) = self.split_axis(axis, factor, inner_split, start_offset, stop_offset)?;
        let view = self.tensor_mut_or_err(tv)?;
        view.domain.leaf.splice(pos..=pos, [outer, inner]);
        if view.compute_at_pos > pos {
            view.compute_at_pos += 1;
        }
        Ok((outer, inner))
    }

    /// Merge leaf axes `pos` and `pos + 1` of `tv`.
    pub fn merge(&mut self, tv: ValId, pos: i64) -> Result<AxisId> {
        let pos = self.leaf_position(tv, pos)?;
        let next = self.leaf_position(tv, pos as i64 + 1)?;
        let leaf = &self.tensor_or_err(tv)?.domain.leaf;
        let (outer, inner) = (leaf[pos], leaf[next]);
        let merged = self.merge_axes(outer, inner)?;
        let view = self.tensor_mut_or_err(tv)?;
        view.domain.leaf.splice(pos..=next, [merged]);
        if view.compute_at_pos > pos {
            view.compute_at_pos -= 1;
        }
        Ok(merged)
    }

    pub fn reorder(&mut self, tv: ValId, old2new: &[(i64, i64)]) -> Result<()> {
        self.tensor_mut_or_err(tv)?.domain.reorder(old2new)
    }

    pub fn parallelize(&mut self, tv: ValId, pos: i64, parallel_type: ParallelType) -> Result<()> {
        let axis = self.axis_at(tv, pos)?;
        self.parallelize_axis(axis, parallel_type);
        Ok(())
    }

    pub fn pad_to_warp(&mut self, tv: ValId, pos: i64, padded_size: Option<i64>) -> Result<()> {
        let axis = self.axis_at(tv, pos)?;
        self.pad_axis_to_warp(axis, padded_size);
        Ok(())
    }

    /// Share the outer `pos` leaf axes of `tv` with its consumers' loop nest.
    pub fn set_compute_at(&mut self, tv: ValId, pos: usize) -> Result<()> {
        let view = self.tensor_mut_or_err(tv)?;
        let rank = view.domain.rank();
        ensure!(pos <= rank, ComputeAtOutOfRangeSnafu { tensor: tv, pos, rank });
        view.compute_at_pos = pos;
        Ok(())
    }

    pub fn set_memory_type(&mut self, tv: ValId, memory_type: MemoryType) -> Result<()> {
        self.tensor_mut_or_err(tv)?.memory_type = memory_type;
        Ok(())
    }
}
