use test_case::test_case;

use crate::error::{Error, ErrorKind};
use crate::types::{BinaryOp, DataType, ParallelType, UnaryOp};
use crate::{ExpressionEvaluator, Fusion, Kernel, is_const};

#[test]
fn test_bind_then_evaluate() {
    let mut fusion = Fusion::new();
    let v = fusion.new_scalar(DataType::Int64);

    let mut ee = ExpressionEvaluator::new(&fusion);
    ee.bind(v, 5).unwrap();
    assert_eq!(ee.evaluate(v).unwrap(), Some(5));
}

#[test]
fn test_double_bind_fails() {
    let mut fusion = Fusion::new();
    let v = fusion.new_scalar(DataType::Int64);

    let mut ee = ExpressionEvaluator::new(&fusion);
    ee.bind(v, 5).unwrap();
    let err = ee.bind(v, 6).unwrap_err();
    assert!(matches!(err, Error::DoubleBind { existing: 5, requested: 6, .. }));
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
}

#[test]
fn test_bind_constant_fails() {
    let mut fusion = Fusion::new();
    let c = fusion.int(3);

    let mut ee = ExpressionEvaluator::new(&fusion);
    assert!(matches!(ee.bind(c, 3), Err(Error::BindConstant { .. })));
}

#[test]
fn test_bind_derived_fails() {
    let mut fusion = Fusion::new();
    let a = fusion.new_scalar(DataType::Int64);
    let b = fusion.new_scalar(DataType::Int64);
    let sum = fusion.add_scalars(a, b).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    assert!(matches!(ee.bind(sum, 1), Err(Error::BindDerived { .. })));
}

#[test]
fn test_bind_tensor_fails() {
    let mut fusion = Fusion::new();
    let tv = fusion.tensor(&[4], DataType::Float32).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    assert!(matches!(ee.bind(tv, 1), Err(Error::NotAScalar { .. })));
}

#[test]
fn test_unbound_operand_is_unresolved() {
    let mut fusion = Fusion::new();
    let a = fusion.new_scalar(DataType::Int64);
    let b = fusion.new_scalar(DataType::Int64);
    let prod = fusion.mul_scalars(a, b).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    ee.bind(a, 7).unwrap();
    assert_eq!(ee.evaluate(prod).unwrap(), None);

    ee.bind(b, 3).unwrap();
    assert_eq!(ee.evaluate(prod).unwrap(), Some(21));
}

#[test]
fn test_fold_all_supported_operators() {
    let mut fusion = Fusion::new();
    let a = fusion.new_scalar(DataType::Int64);
    let b = fusion.new_scalar(DataType::Int64);
    let ops = [
        (BinaryOp::Add, 17),
        (BinaryOp::Sub, 11),
        (BinaryOp::Mul, 42),
        (BinaryOp::Div, 4),
        (BinaryOp::Mod, 2),
        (BinaryOp::CeilDiv, 5),
        (BinaryOp::And, 1),
    ];
    let exprs: Vec<_> = ops.iter().map(|&(op, _)| fusion.scalar_binary(op, a, b).unwrap()).collect();
    let neg = fusion.scalar_unary(UnaryOp::Neg, a).unwrap();
    let cast = fusion.scalar_unary(UnaryOp::Cast, b).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    ee.bind(a, 14).unwrap();
    ee.bind(b, 3).unwrap();
    for (&(op, expected), &e) in ops.iter().zip(&exprs) {
        assert_eq!(ee.evaluate(e).unwrap(), Some(expected), "{op}");
    }
    assert_eq!(ee.evaluate(neg).unwrap(), Some(-14));
    assert_eq!(ee.evaluate(cast).unwrap(), Some(3));
}

#[test]
fn test_division_by_known_zero_fails() {
    let mut fusion = Fusion::new();
    let n = fusion.new_scalar(DataType::Int64);
    let zero = fusion.int(0);
    let div = fusion.scalar_binary(BinaryOp::Div, n, zero).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    assert!(matches!(ee.evaluate(div), Err(Error::DivisionByZero { op: BinaryOp::Div, .. })));
}

#[test_case(BinaryOp::Div, i64::MIN, -1; "div overflow")]
#[test_case(BinaryOp::Mod, i64::MIN, -1; "mod overflow")]
#[test_case(BinaryOp::CeilDiv, i64::MIN, -1; "ceil div overflow")]
#[test_case(BinaryOp::Add, i64::MAX, 1; "add overflow")]
#[test_case(BinaryOp::Sub, i64::MIN, 1; "sub overflow")]
#[test_case(BinaryOp::Mul, i64::MAX, 2; "mul overflow")]
fn test_overflow_is_unresolved(op: BinaryOp, lhs: i64, rhs: i64) {
    let mut fusion = Fusion::new();
    let n = fusion.new_scalar(DataType::Int64);
    let d = fusion.int(rhs);
    let e = fusion.scalar_binary(op, n, d).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    ee.bind(n, lhs).unwrap();
    assert_eq!(ee.evaluate(e).unwrap(), None);
}

#[test_case(i64::MAX, 2, i64::MAX / 2 + 1; "max over two")]
#[test_case(i64::MAX - 1, i64::MAX, 1; "just below max")]
#[test_case(-7, 2, -3; "negative dividend")]
#[test_case(7, -2, -3; "negative divisor")]
#[test_case(8, 4, 2; "exact")]
fn test_ceil_div_near_limits(lhs: i64, rhs: i64, expected: i64) {
    let mut fusion = Fusion::new();
    let n = fusion.new_scalar(DataType::Int64);
    let d = fusion.int(rhs);
    let e = fusion.scalar_binary(BinaryOp::CeilDiv, n, d).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    ee.bind(n, lhs).unwrap();
    assert_eq!(ee.evaluate(e).unwrap(), Some(expected));
}

#[test]
fn test_neg_overflow_is_unresolved() {
    let mut fusion = Fusion::new();
    let n = fusion.new_scalar(DataType::Int64);
    let neg = fusion.scalar_unary(UnaryOp::Neg, n).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    ee.bind(n, i64::MIN).unwrap();
    assert_eq!(ee.evaluate(neg).unwrap(), None);
}

#[test]
fn test_unsupported_operator_fails() {
    let mut fusion = Fusion::new();
    let a = fusion.new_scalar(DataType::Int64);
    let b = fusion.new_scalar(DataType::Int64);
    let max = fusion.scalar_binary(BinaryOp::Max, a, b).unwrap();
    let exp = fusion.scalar_unary(UnaryOp::Exp, a).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    assert!(matches!(ee.evaluate(max), Err(Error::UnsupportedOperator { .. })));
    assert!(matches!(ee.evaluate(exp), Err(Error::UnsupportedOperator { .. })));
}

#[test]
fn test_named_scalar_resolves_parallel_extent() {
    let mut fusion = Fusion::new();
    let bdimx = fusion.named_scalar("blockDim.x", DataType::Int64);
    let four = fusion.int(4);
    let total = fusion.mul_scalars(bdimx, four).unwrap();

    let mut ee = ExpressionEvaluator::new(&fusion);
    assert_eq!(ee.evaluate(total).unwrap(), None);
    ee.bind_parallel(ParallelType::TIDx, 32).unwrap();
    assert_eq!(ee.evaluate(total).unwrap(), Some(128));

    ee.bind_parallel(ParallelType::TIDx, 32).unwrap();
    let err = ee.bind_parallel(ParallelType::TIDx, 64).unwrap_err();
    assert!(matches!(err, Error::DoubleBindParallel { existing: 32, requested: 64, .. }));
}

#[test]
fn test_is_const() {
    let mut fusion = Fusion::new();
    let a = fusion.int(6);
    let n = fusion.new_scalar(DataType::Int64);
    let folded = fusion.mul_scalars(a, a).unwrap();
    let symbolic = fusion.add_scalars(n, a).unwrap();

    assert!(is_const(&fusion, a));
    assert!(is_const(&fusion, folded));
    assert!(!is_const(&fusion, n));
    assert!(!is_const(&fusion, symbolic));
}

#[test]
fn test_evaluate_kernel_values() {
    let mut kernel = Kernel::new();
    let x = kernel.new_scalar(DataType::Int64);
    let four = kernel.int(4);
    let prod = kernel.binary(BinaryOp::Mul, x, four);
    let tidx = kernel.parallel_extent(ParallelType::TIDx).unwrap();

    let mut ee = ExpressionEvaluator::new(&kernel);
    ee.bind(x, 8).unwrap();
    ee.bind_parallel(ParallelType::TIDx, 64).unwrap();
    assert_eq!(ee.evaluate(prod).unwrap(), Some(32));
    assert_eq!(ee.evaluate(tidx).unwrap(), Some(64));
}
