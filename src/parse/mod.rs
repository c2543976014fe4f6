//! Lexer and parser: source text to typed AST.

pub mod error;
pub mod grammar;
pub mod lexer;

pub use error::SyntaxError;
pub use grammar::Parser;
pub use lexer::{Lexer, Spanned, Token};

use crate::ast::Module;

/// Parses one source module. Modules parse independently; the compiler
/// merges them.
pub fn parse(src: &str) -> Result<Module, SyntaxError> {
    let tokens = Lexer::new(src).tokenize()?;
    Parser::new(tokens).parse_module()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AggregateOp, BinaryOp, Builtin, Expr, ValueType};

    #[test]
    fn parses_scalar_variable() {
        let module = parse(
            "variable gov/tax/rate:
                 from 2024-01-01: 0.25",
        )
        .unwrap();
        assert_eq!(module.variables.len(), 1);
        let var = &module.variables[0];
        assert_eq!(var.path, "gov/tax/rate");
        assert_eq!(var.entity, None);
        assert_eq!(var.clauses.len(), 1);
        assert_eq!(var.clauses[0].expr, Expr::Number(0.25));
    }

    #[test]
    fn parses_entity_scoped_variable_with_metadata() {
        let module = parse(
            r#"variable person/tax:
                 entity: person
                 type: money
                 citation: "26 USC 1"
                 from 2024-01-01: income * gov/rate"#,
        )
        .unwrap();
        let var = &module.variables[0];
        assert_eq!(var.entity.as_deref(), Some("person"));
        assert_eq!(var.ty, Some(ValueType::Money));
        assert_eq!(var.citation.as_deref(), Some("26 USC 1"));
        match &var.clauses[0].expr {
            Expr::Binary { op: BinaryOp::Mul, left, right } => {
                assert_eq!(**left, Expr::Ref("income".into()));
                assert_eq!(**right, Expr::Ref("gov/rate".into()));
            }
            other => panic!("expected multiplication, got {other:?}"),
        }
    }

    #[test]
    fn bounded_clause_end_becomes_exclusive() {
        let module = parse(
            "variable gov/threshold:
                 from 2023-01-01 to 2023-12-31: 10000
                 from 2024-01-01: 12000",
        )
        .unwrap();
        let clauses = &module.variables[0].clauses;
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].to, Some("2024-01-01".parse().unwrap()));
        assert_eq!(clauses[1].to, None);
    }

    #[test]
    fn parses_entity_declaration() {
        let module = parse(
            "entity person:
                 key: id
                 parent: household via household_id
                 age: int
                 income: float",
        )
        .unwrap();
        let decl = &module.entities[0];
        assert_eq!(decl.name, "person");
        assert_eq!(decl.key, "id");
        assert_eq!(decl.parent.as_ref().unwrap().entity, "household");
        assert_eq!(decl.parent.as_ref().unwrap().fk_field, "household_id");
        assert_eq!(decl.fields.len(), 2);
        assert_eq!(decl.fields[0].ty, ValueType::Int);
    }

    #[test]
    fn entity_decl_after_variable_body() {
        // `entity` is both a clause keyword and a declaration keyword; the
        // token after it disambiguates.
        let module = parse(
            "variable person/tax:
                 entity: person
                 from 2024-01-01: income

             entity person:
                 income: float",
        )
        .unwrap();
        assert_eq!(module.variables.len(), 1);
        assert_eq!(module.entities.len(), 1);
    }

    #[test]
    fn parses_amendment_with_knowledge_date() {
        let module = parse(
            "amend gov/rate:
                 known 2024-03-15
                 from 2024-07-01: 0.30",
        )
        .unwrap();
        let amend = &module.amendments[0];
        assert_eq!(amend.target, "gov/rate");
        assert_eq!(amend.known, Some("2024-03-15".parse().unwrap()));
        assert_eq!(amend.clauses.len(), 1);
    }

    #[test]
    fn parses_repeal() {
        let module = parse("repeal gov/rate:\n from 2026-01-01").unwrap();
        assert_eq!(module.repeals[0].target, "gov/rate");
        assert_eq!(module.repeals[0].from, "2026-01-01".parse().unwrap());
    }

    #[test]
    fn conditional_chain_nests_right() {
        let module = parse(
            "variable t/x:
                 from 2024-01-01:
                     if income > 50000: income * 0.3
                     else if income > 10000: income * 0.2
                     else: 0",
        )
        .unwrap();
        let Expr::If { otherwise, .. } = &module.variables[0].clauses[0].expr else {
            panic!("expected conditional");
        };
        assert!(matches!(**otherwise, Expr::If { .. }));
    }

    #[test]
    fn aggregation_and_builtin_calls_disambiguate() {
        let module = parse(
            "variable household/total:
                 entity: household
                 from 2024-01-01: sum(person: income) + min(1, 2)",
        )
        .unwrap();
        let Expr::Binary { left, right, .. } = &module.variables[0].clauses[0].expr else {
            panic!("expected addition");
        };
        assert!(matches!(
            **left,
            Expr::Aggregate { op: AggregateOp::Sum, .. }
        ));
        assert!(matches!(**right, Expr::Call { func: Builtin::Min, .. }));
    }

    #[test]
    fn parameter_with_bracket_schedule() {
        let module = parse(
            "parameter gov/schedule:
                 from 2024-01-01: { 0: 10%, $11,000: 12%, $44,725: 22% }",
        )
        .unwrap();
        let Expr::Brackets(pairs) = &module.parameters[0].clauses[0].expr else {
            panic!("expected bracket literal");
        };
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[1], (11000.0, 0.12));
    }

    #[test]
    fn error_pinpoints_position_and_expectation() {
        let err = parse("variable gov/rate\n from 2024-01-01: 1").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.expected.contains("':'"), "expected hint: {}", err.expected);
    }

    #[test]
    fn wrong_arity_is_a_syntax_error() {
        let err = parse(
            "variable t/x:
                 from 2024-01-01: clip(1, 2)",
        )
        .unwrap_err();
        assert!(err.expected.contains("3 argument"));
    }

    #[test]
    fn unknown_function_is_a_syntax_error() {
        let err = parse(
            "variable t/x:
                 from 2024-01-01: median(1, 2)",
        )
        .unwrap_err();
        assert!(err.expected.contains("builtin"));
    }
}
