use crate::types::ComparisonOperator;

/// Absolute tolerance used by the `=` operator.
pub const EQUALITY_EPSILON: f64 = 1e-4;

/// Apply a threshold comparison to a resolved metric value.
///
/// Pure and deterministic: the same inputs always yield the same answer, and
/// equality never uses exact floating point comparison.
pub fn evaluate(value: f64, operator: ComparisonOperator, threshold: f64) -> bool {
    match operator {
        ComparisonOperator::Lt => value < threshold,
        ComparisonOperator::Le => value <= threshold,
        ComparisonOperator::Gt => value > threshold,
        ComparisonOperator::Ge => value >= threshold,
        ComparisonOperator::Eq => (value - threshold).abs() <= EQUALITY_EPSILON,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strict_and_inclusive_bounds() {
        assert!(evaluate(5.0, ComparisonOperator::Lt, 10.0));
        assert!(!evaluate(10.0, ComparisonOperator::Lt, 10.0));
        assert!(evaluate(10.0, ComparisonOperator::Le, 10.0));
        assert!(evaluate(25.0, ComparisonOperator::Gt, 20.0));
        assert!(!evaluate(20.0, ComparisonOperator::Gt, 20.0));
        assert!(evaluate(20.0, ComparisonOperator::Ge, 20.0));
    }

    #[test]
    fn equality_uses_epsilon() {
        assert!(evaluate(10.00001, ComparisonOperator::Eq, 10.0));
        assert!(!evaluate(10.1, ComparisonOperator::Eq, 10.0));
        assert!(evaluate(0.1 + 0.2, ComparisonOperator::Eq, 0.3));
    }

    proptest! {
        #[test]
        fn lt_and_ge_are_complementary(value in -1.0e9f64..1.0e9, threshold in -1.0e9f64..1.0e9) {
            prop_assert_ne!(
                evaluate(value, ComparisonOperator::Lt, threshold),
                evaluate(value, ComparisonOperator::Ge, threshold)
            );
        }

        #[test]
        fn gt_and_le_are_complementary(value in -1.0e9f64..1.0e9, threshold in -1.0e9f64..1.0e9) {
            prop_assert_ne!(
                evaluate(value, ComparisonOperator::Gt, threshold),
                evaluate(value, ComparisonOperator::Le, threshold)
            );
        }

        #[test]
        fn equality_is_symmetric(value in -1.0e6f64..1.0e6, offset in -1.0e-3f64..1.0e-3) {
            let other = value + offset;
            prop_assert_eq!(
                evaluate(value, ComparisonOperator::Eq, other),
                evaluate(other, ComparisonOperator::Eq, value)
            );
        }
    }
}
