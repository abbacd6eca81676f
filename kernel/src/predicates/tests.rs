use super::*;
use crate::arrow::datatypes::DataType;
use crate::expressions::{column_expr, column_name};

macro_rules! expect_eq {
    ( $expr: expr, $expect: expr, $fmt: literal ) => {
        let expect = ($expect);
        let result = ($expr);
        assert!(
            result == expect,
            "Expected {} = {:?}, got {:?}",
            format!($fmt),
            expect,
            result
        );
    };
}

fn known(values: &[(&str, Scalar)]) -> KnownFieldValues {
    values
        .iter()
        .map(|(name, value)| (ColumnName::new(*name), value.clone()))
        .collect()
}

#[test]
fn test_eval_literals() {
    let filter = TruthEvaluator::from(KnownFieldValues::new());
    let test_cases = [
        (Expr::literal(true), Some(true)),
        (Expr::literal(false), Some(false)),
        (Expr::not(Expr::literal(false)), Some(true)),
        (Expr::literal(1i64), None),
        (Expr::not(Expr::literal(1i64)), None),
        (Expr::null_literal(DataType::Boolean), None),
        (Expr::not(Expr::null_literal(DataType::Boolean)), None),
    ];
    for (expr, expect) in test_cases {
        expect_eq!(filter.eval(&expr), expect, "{expr}");
    }
}

#[test]
fn test_compare_scalars() {
    use BinaryOperator::*;
    let small = Scalar::Long(1);
    let large = Scalar::Long(10);
    let test_cases = [
        (Equal, &small, &small, Some(true)),
        (NotEqual, &small, &large, Some(true)),
        (LessThan, &small, &large, Some(true)),
        (LessThanOrEqual, &large, &large, Some(true)),
        (GreaterThan, &small, &large, Some(false)),
        (GreaterThanOrEqual, &small, &large, Some(false)),
        // Arithmetic never produces a boolean
        (Plus, &small, &large, None),
    ];
    for (op, left, right, expect) in test_cases {
        expect_eq!(compare(op, left, right), expect, "{left} {op} {right}");
    }
    // Mismatched types and nulls are never comparable
    expect_eq!(compare(Equal, &small, &Scalar::Integer(1)), None, "1L = 1");
    let null = Scalar::Null(DataType::Int64);
    expect_eq!(compare(LessThan, &null, &large), None, "NULL < {large}");
    expect_eq!(compare(Equal, &null, &null), None, "NULL = NULL");
}

#[test]
fn test_compare_distinct() {
    let null = Scalar::Null(DataType::Int32);
    let test_cases = [
        (Scalar::Integer(1), Scalar::Integer(1), Some(false)),
        (Scalar::Integer(1), Scalar::Integer(2), Some(true)),
        (null.clone(), null.clone(), Some(false)),
        (null.clone(), Scalar::Integer(2), Some(true)),
        (Scalar::Integer(1), Scalar::Long(1), None),
    ];
    for (left, right, expect) in test_cases {
        expect_eq!(
            compare(BinaryOperator::Distinct, &left, &right),
            expect,
            "DISTINCT({left}, {right})"
        );
    }
}

#[test]
fn test_junction() {
    let test_cases: Vec<(&[_], _, _)> = vec![
        // input, AND expect, OR expect
        (&[], Some(true), Some(false)),
        (&[Some(true)], Some(true), Some(true)),
        (&[Some(false)], Some(false), Some(false)),
        (&[None], None, None),
        (&[Some(true), Some(false)], Some(false), Some(true)),
        (&[Some(true), None], None, Some(true)),
        (&[None, Some(true)], None, Some(true)),
        (&[Some(false), None], Some(false), None),
        (&[None, Some(false)], Some(false), None),
        (&[Some(true), None, Some(false)], Some(false), Some(true)),
    ];
    for (inputs, expect_and, expect_or) in test_cases {
        let values = || inputs.iter().copied();
        expect_eq!(junction(JunctionOperator::And, values()), expect_and, "AND({inputs:?})");
        expect_eq!(junction(JunctionOperator::Or, values()), expect_or, "OR({inputs:?})");
    }

    // A dominating input stops evaluation
    let mut evaluated = 0;
    let values = [Some(false), None, Some(true)].into_iter().inspect(|_| evaluated += 1);
    assert_eq!(junction(JunctionOperator::And, values), Some(false));
    assert_eq!(evaluated, 1);
}

#[test]
fn test_eval_missing_fields_are_unknown() {
    let bindings = known(&[("state", Scalar::from("NY"))]);
    let filter = TruthEvaluator::from(&bindings);

    let city = column_expr!("city").eq(Expr::literal("Franklin"));
    expect_eq!(filter.eval(&city), None, "{city}");

    // FALSE dominates an AND even when the other side is unknown
    let both = Expr::and(column_expr!("state").eq(Expr::literal("CA")), city.clone());
    expect_eq!(filter.eval(&both), Some(false), "{both}");

    let either = Expr::or(column_expr!("state").eq(Expr::literal("NY")), city.clone());
    expect_eq!(filter.eval(&either), Some(true), "{either}");

    let not_city = Expr::not(city.clone());
    expect_eq!(filter.eval(&not_city), None, "{not_city}");

    // Function calls and arithmetic are never evaluated
    let call = Expr::call("delay", [column_expr!("state")]);
    expect_eq!(filter.eval(&call), None, "{call}");
}

#[test]
fn test_eval_commutes_literal_on_left() {
    let bindings = known(&[("x", Scalar::Integer(5))]);
    let filter = TruthEvaluator::from(&bindings);
    let test_cases = [
        (Expr::literal(1).lt(column_expr!("x")), Some(true)),
        (Expr::literal(1).ge(column_expr!("x")), Some(false)),
        (Expr::literal(5).le(column_expr!("x")), Some(true)),
        (Expr::literal(6).ne(column_expr!("x")), Some(true)),
        (column_expr!("x").eq(column_expr!("x")), Some(true)),
        (column_expr!("x").eq(column_expr!("y")), None),
    ];
    for (expr, expect) in test_cases {
        expect_eq!(filter.eval(&expr), expect, "{expr}");
    }
}

#[test]
fn test_eval_is_null() {
    let bindings = known(&[
        ("year", Scalar::Null(DataType::Null)),
        ("month", Scalar::Integer(1)),
    ]);
    let filter = TruthEvaluator::from(&bindings);
    let test_cases = [
        (column_expr!("year").is_null(), Some(true)),
        (column_expr!("year").is_not_null(), Some(false)),
        (column_expr!("month").is_null(), Some(false)),
        (column_expr!("day").is_null(), None),
        (Expr::null_literal(DataType::Int32).is_null(), Some(true)),
        // Only columns and literals can be null-checked safely
        (column_expr!("month").gt(Expr::literal(0)).is_null(), None),
    ];
    for (expr, expect) in test_cases {
        expect_eq!(filter.eval(&expr), expect, "{expr}");
    }
}

#[test]
fn test_sql_where() {
    let bindings = known(&[
        ("null_col", Scalar::Null(DataType::Int32)),
        ("val", Scalar::Integer(1)),
    ]);
    let filter = TruthEvaluator::from(&bindings);
    let null_cmp = column_expr!("null_col").lt(Expr::literal(10));
    let missing_cmp = column_expr!("missing").lt(Expr::literal(10));
    let test_cases = [
        // (expr, plain 3VL result, SQL WHERE result)
        (null_cmp.clone(), None, Some(false)),
        (Expr::and(null_cmp.clone(), Expr::literal(true)), None, Some(false)),
        (Expr::or(null_cmp.clone(), Expr::literal(false)), None, Some(false)),
        (Expr::not(null_cmp.clone()), None, Some(false)),
        (Expr::null_literal(DataType::Boolean), None, Some(false)),
        // Fields without a known value stay unknown under both semantics
        (missing_cmp.clone(), None, None),
        (Expr::and(missing_cmp.clone(), null_cmp.clone()), None, Some(false)),
        (Expr::or(missing_cmp.clone(), null_cmp.clone()), None, None),
        (
            column_expr!("val").eq(Expr::literal(1)),
            Some(true),
            Some(true),
        ),
    ];
    for (expr, expect, expect_sql) in test_cases {
        expect_eq!(filter.eval(&expr), expect, "{expr}");
        expect_eq!(filter.eval_sql_where(&expr), expect_sql, "WHERE {expr}");
    }
}

#[test]
fn test_root_partition_implication() {
    let root = column_expr!("i32").eq(Expr::literal(5));
    let test_cases = [
        (root.clone(), Some(true)),
        (column_expr!("i32").eq(Expr::literal(6)), Some(false)),
        (column_expr!("i32").gt(Expr::literal(1)), Some(true)),
        (column_expr!("f32").eq(Expr::literal(3.0f32)), None),
        (Expr::always_true(), Some(true)),
    ];
    for (filter, expect) in test_cases {
        expect_eq!(root.implies(&filter), expect, "{root} => {filter}");
    }
    // `true` guarantees nothing, so it implies nothing that depends on a field
    let filter = column_expr!("i32").eq(Expr::literal(6));
    expect_eq!(Expr::always_true().implies(&filter), None, "true => {filter}");
}

#[test]
fn test_partition_tree_example() {
    let filter = column_expr!("city").eq(Expr::literal("Franklin"));
    let bindings = |country: &str, state: &str, city: Option<&str>| {
        let mut values = vec![
            ("country", Scalar::from(country)),
            ("state", Scalar::from(state)),
        ];
        if let Some(city) = city {
            values.push(("city", Scalar::from(city)));
        }
        known(&values)
    };
    let test_cases = [
        (bindings("US", "NY", None), None),
        (bindings("US", "NY", Some("Franklin")), Some(true)),
        (bindings("US", "NY", Some("New York")), Some(false)),
        (bindings("US", "CA", Some("San Francisco")), Some(false)),
    ];
    for (bindings, expect) in test_cases {
        expect_eq!(
            filter.satisfiable_under(&bindings),
            expect,
            "{filter} given {bindings:?}"
        );
    }
    assert_eq!(column_name!("city").as_str(), "city");
}
