//! Per-fusion lowering context.
//!
//! [`LowerContext`] owns the kernel-IR arena and the id maps between the
//! fusion and kernel universes. Lowering is memoized: every fusion value or
//! axis is cloned into the kernel at most once, so kernel ids are stable for
//! the whole pipeline and can be mapped back to their fusion origin.

use std::collections::HashMap;

use smallvec::SmallVec;
use trellis_ir::fusion::Expr as FExpr;
use trellis_ir::kir::{self, Kernel};
use trellis_ir::{AxisId, ExprId, Fusion, ParallelType, ValId, ValKind};

use crate::error::*;

/// Kernel-wide facts about warp-padded `TIDx` axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarpPaddedInfo {
    /// Some `TIDx` axis is padded to a multiple of the warp size.
    pub is_tidx_padded: bool,
    /// Every `TIDx` axis is provably confined to a single warp.
    pub is_tidx_single_warp: bool,
}

pub struct LowerContext<'f> {
    fusion: &'f Fusion,
    kernel: Kernel,
    vals: HashMap<ValId, kir::ValId>,
    axes: HashMap<AxisId, kir::AxisId>,
    kir_axes: HashMap<kir::AxisId, AxisId>,
    halo_widths: HashMap<AxisId, i64>,
    warp_padded: WarpPaddedInfo,
}

impl<'f> LowerContext<'f> {
    pub fn new(fusion: &'f Fusion, warp_size: i64) -> Self {
        let warp_padded = collect_warp_padded_info(fusion, warp_size);
        tracing::debug!(?warp_padded, "lowering context created");
        Self {
            fusion,
            kernel: Kernel::new(),
            vals: HashMap::new(),
            axes: HashMap::new(),
            kir_axes: HashMap::new(),
            halo_widths: HashMap::new(),
            warp_padded,
        }
    }

    pub fn fusion(&self) -> &'f Fusion {
        self.fusion
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn into_kernel(self) -> Kernel {
        self.kernel
    }

    pub fn warp_padded_info(&self) -> WarpPaddedInfo {
        self.warp_padded
    }

    // ------------------------------------------------------------------
    // Values and axes
    // ------------------------------------------------------------------

    /// Kernel counterpart of `v`, lowering it (and what it depends on) on first use.
    pub fn lower_value(&mut self, v: ValId) -> Result<kir::ValId> {
        if let Some(&k) = self.vals.get(&v) {
            return Ok(k);
        }
        let fusion = self.fusion;
        let val = fusion.val(v);
        let dtype = val.dtype();
        let lowered = match val.kind() {
            ValKind::Tensor(tv) => {
                let domain = tv.leaf().iter().map(|&a| self.lower_axis(a)).collect::<Result<Vec<_>>>()?;
                self.kernel.tensor_view(v, domain, tv.memory_type(), dtype)
            }
            ValKind::NamedScalar { name } => self.kernel.named_scalar(name, dtype),
            ValKind::Scalar { value: Some(c) } => self.kernel.push_val(kir::ValKind::Scalar { value: Some(*c) }, dtype),
            ValKind::Scalar { value: None } => match val.definition() {
                None => self.kernel.new_scalar(dtype),
                Some(def) => {
                    let out = self.kernel.new_scalar(dtype);
                    self.vals.insert(v, out);
                    let expr = self.lower_scalar_expr(def, out)?;
                    self.kernel.push_expr(expr);
                    return Ok(out);
                }
            },
        };
        self.vals.insert(v, lowered);
        Ok(lowered)
    }

    fn lower_scalar_expr(&mut self, def: ExprId, out: kir::ValId) -> Result<kir::Expr> {
        let fusion = self.fusion;
        Ok(match *fusion.expr(def) {
            FExpr::Unary { op, input, .. } => kir::Expr::Unary { op, out, input: self.lower_value(input)? },
            FExpr::Binary { op, lhs, rhs, .. } => {
                kir::Expr::Binary { op, out, lhs: self.lower_value(lhs)?, rhs: self.lower_value(rhs)? }
            }
            FExpr::Ternary { op, a, b, c, .. } => kir::Expr::Ternary {
                op,
                out,
                a: self.lower_value(a)?,
                b: self.lower_value(b)?,
                c: self.lower_value(c)?,
            },
            ref other @ (FExpr::Reduction { .. } | FExpr::Broadcast { .. }) => {
                return ScalarOutputExpectedSnafu { expr: other.kind_name() }.fail();
            }
        })
    }

    /// Kernel counterpart of `axis`, lowering it on first use.
    pub fn lower_axis(&mut self, axis: AxisId) -> Result<kir::AxisId> {
        if let Some(&k) = self.axes.get(&axis) {
            return Ok(k);
        }
        let fusion = self.fusion;
        let id = fusion.axis(axis);
        let lowered = kir::IterDomain {
            start: self.lower_value(id.start())?,
            extent: self.lower_value(id.extent())?,
            stop_offset: self.lower_value(id.stop_offset())?,
            parallel_type: id.parallel_type(),
            iter_type: id.iter_type(),
            is_rfactor_product: id.is_rfactor_product(),
            padded_to_warp: id.is_padded_to_warp(),
            padded_size: id.padded_size(),
        };
        let k = self.kernel.push_axis(lowered);
        self.axes.insert(axis, k);
        self.kir_axes.insert(k, axis);
        Ok(k)
    }

    /// Already-lowered kernel counterpart of `axis`.
    pub fn kernel_axis(&self, axis: AxisId) -> Option<kir::AxisId> {
        self.axes.get(&axis).copied()
    }

    /// Fusion origin of a lowered axis.
    pub fn fusion_axis(&self, axis: kir::AxisId) -> Option<AxisId> {
        self.kir_axes.get(&axis).copied()
    }

    /// Already-lowered kernel counterpart of `v`.
    pub fn kernel_value(&self, v: ValId) -> Option<kir::ValId> {
        self.vals.get(&v).copied()
    }

    /// Lower a tensor expression. Tensor operands are resolved through
    /// `index_of(ctx, tensor, is_output)`; scalar operands are lowered directly.
    pub fn lower_expr(
        &mut self,
        expr: ExprId,
        mut index_of: impl FnMut(&mut Self, ValId, bool) -> Result<kir::ValId>,
    ) -> Result<kir::ExprId> {
        let fusion = self.fusion;
        let mut operand = |ctx: &mut Self, v: ValId, is_output: bool| -> Result<kir::ValId> {
            match (fusion.val(v).is_tensor(), is_output) {
                (true, _) => index_of(ctx, v, is_output),
                (false, true) => Ok(ctx.scalar_output(v)),
                (false, false) => ctx.lower_value(v),
            }
        };
        let lowered = match *fusion.expr(expr) {
            FExpr::Unary { op, out, input } => {
                kir::Expr::Unary { op, out: operand(self, out, true)?, input: operand(self, input, false)? }
            }
            FExpr::Binary { op, out, lhs, rhs } => kir::Expr::Binary {
                op,
                out: operand(self, out, true)?,
                lhs: operand(self, lhs, false)?,
                rhs: operand(self, rhs, false)?,
            },
            FExpr::Ternary { op, out, a, b, c } => kir::Expr::Ternary {
                op,
                out: operand(self, out, true)?,
                a: operand(self, a, false)?,
                b: operand(self, b, false)?,
                c: operand(self, c, false)?,
            },
            FExpr::Reduction { op, init, out, input } => kir::Expr::Reduction {
                op,
                init: self.lower_value(init)?,
                out: operand(self, out, true)?,
                input: operand(self, input, false)?,
                predicate: None,
                warp_allreduce: false,
            },
            FExpr::Broadcast { out, input, .. } => kir::Expr::Broadcast {
                out: operand(self, out, true)?,
                input: operand(self, input, false)?,
                predicate: None,
            },
        };
        Ok(self.kernel.push_expr(lowered))
    }

    /// Fusion tensor behind a lowered tensor view or tensor index.
    pub fn fusion_tensor(&self, v: kir::ValId) -> Option<ValId> {
        let view = self.kernel.view_of(v)?;
        match self.kernel.val(view).kind {
            kir::ValKind::TensorView { fusion_tv, .. } => Some(fusion_tv),
            _ => None,
        }
    }

    /// Kernel value for a scalar about to be defined by a lowered expression.
    /// Unlike [`lower_value`](Self::lower_value) this does not lower the
    /// scalar's own definition.
    fn scalar_output(&mut self, v: ValId) -> kir::ValId {
        if let Some(&k) = self.vals.get(&v) {
            return k;
        }
        let k = self.kernel.new_scalar(self.fusion.val(v).dtype());
        self.vals.insert(v, k);
        k
    }

    /// Tensor index of `view` with the given per-axis indices.
    pub fn tensor_index(&mut self, tv: ValId, indices: SmallVec<[kir::ValId; 8]>) -> Result<kir::ValId> {
        let view = self.lower_value(tv)?;
        Ok(self.kernel.tensor_index(view, indices))
    }

    // ------------------------------------------------------------------
    // Halo
    // ------------------------------------------------------------------

    /// Record that loops over `axis` must cover `width` extra elements.
    pub fn set_halo_width(&mut self, axis: AxisId, width: i64) {
        self.halo_widths.insert(axis, width);
    }

    pub fn halo_width(&self, axis: AxisId) -> i64 {
        self.halo_widths.get(&axis).copied().unwrap_or(0)
    }

    /// `extent + halo` for axes with a registered halo, `None` otherwise.
    pub fn halo_extent(&mut self, axis: AxisId) -> Result<Option<kir::ValId>> {
        let width = self.halo_width(axis);
        if width == 0 {
            return Ok(None);
        }
        let fusion = self.fusion;
        let extent = self.lower_value(fusion.axis(axis).extent())?;
        let width = self.kernel.int(width);
        Ok(Some(self.kernel.add(extent, width)))
    }
}

fn collect_warp_padded_info(fusion: &Fusion, warp_size: i64) -> WarpPaddedInfo {
    let mut info = WarpPaddedInfo::default();
    let mut single_warp = true;
    for tv in fusion.all_tensors() {
        let Ok(view) = fusion.tensor_view(tv) else { continue };
        for &a in view.leaf() {
            let id = fusion.axis(a);
            if id.parallel_type() != ParallelType::TIDx || id.is_broadcast() {
                continue;
            }
            let size = id.padded_size().or_else(|| fusion.const_int(id.extent()));
            if id.is_padded_to_warp() {
                info.is_tidx_padded = true;
                single_warp &= size == Some(warp_size);
            } else {
                single_warp &= size.is_some_and(|s| s <= warp_size);
            }
        }
    }
    info.is_tidx_single_warp = info.is_tidx_padded && single_warp;
    info
}
