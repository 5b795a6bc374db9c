//! Plan builders shared by the integration tests.
#![allow(dead_code)]

use jobwave_core::id::OpId;
use jobwave_core::plan::{AggregateCall, AggregateFunction, JoinType, OpKind, PhysicalPlan};
use jobwave_core::schema::{DataType, Field, Schema};

pub fn events_schema() -> Schema {
    Schema::new(vec![
        Field::new("user", DataType::Utf8, false),
        Field::new("country", DataType::Utf8, true),
        Field::new("amount", DataType::Float64, true),
    ])
}

pub fn load(plan: &mut PhysicalPlan, location: &str) -> OpId {
    plan.add(
        OpKind::Load {
            location: location.into(),
            schema: Some(events_schema()),
        },
        vec![],
    )
}

/// `Group` on `key` followed by an aggregate.
pub fn group_agg(
    plan: &mut PhysicalPlan,
    input: OpId,
    key: &str,
    function: AggregateFunction,
    column: Option<&str>,
    alias: &str,
) -> OpId {
    let g = plan.add(
        OpKind::Group {
            keys: vec![key.into()],
        },
        vec![input],
    );
    plan.add(
        OpKind::Aggregate {
            calls: vec![AggregateCall::new(function, column, alias)],
        },
        vec![g],
    )
}

pub fn store(plan: &mut PhysicalPlan, input: OpId, location: &str) -> OpId {
    plan.add(
        OpKind::Store {
            location: location.into(),
            format: "csv".into(),
        },
        vec![input],
    )
}

/// Three shuffles in a row: compiles to A → B → C.
pub fn chain_of_three() -> PhysicalPlan {
    chain_of_three_into("out/chain")
}

pub fn chain_of_three_into(output: &str) -> PhysicalPlan {
    let mut plan = PhysicalPlan::new();
    let l = load(&mut plan, "in/events");
    let a = group_agg(
        &mut plan,
        l,
        "user",
        AggregateFunction::Sum,
        Some("amount"),
        "spent",
    );
    let b = group_agg(
        &mut plan,
        a,
        "spent",
        AggregateFunction::Count,
        None,
        "users",
    );
    let c = group_agg(
        &mut plan,
        b,
        "users",
        AggregateFunction::Max,
        Some("spent"),
        "top",
    );
    store(&mut plan, c, output);
    plan
}

/// Two independent aggregations joined: compiles to {A, B} → C.
pub fn fan_in() -> PhysicalPlan {
    let mut plan = PhysicalPlan::new();
    let left = load(&mut plan, "in/orders");
    let right = load(&mut plan, "in/refunds");
    let a = group_agg(
        &mut plan,
        left,
        "user",
        AggregateFunction::Sum,
        Some("amount"),
        "ordered",
    );
    let b = group_agg(
        &mut plan,
        right,
        "user",
        AggregateFunction::Sum,
        Some("amount"),
        "refunded",
    );
    let j = plan.add(
        OpKind::Join {
            keys: vec![vec!["user".into()], vec!["user".into()]],
            join_type: JoinType::Inner,
        },
        vec![a, b],
    );
    store(&mut plan, j, "out/net");
    plan
}

/// A little of everything: stream, distinct, outer join, split.
pub fn mixed() -> PhysicalPlan {
    let mut plan = PhysicalPlan::new();
    let events = load(&mut plan, "in/events");
    let clean = plan.add(
        OpKind::Stream {
            command: "./scrub.sh".into(),
            output_schema: Some(events_schema()),
        },
        vec![events],
    );
    let per_country = group_agg(
        &mut plan,
        clean,
        "country",
        AggregateFunction::Avg,
        Some("amount"),
        "avg_amount",
    );
    store(&mut plan, per_country, "out/per_country");

    let users = plan.add(
        OpKind::Project {
            columns: vec!["user".into(), "country".into()],
        },
        vec![clean],
    );
    let distinct = plan.add(OpKind::Distinct, vec![users]);
    let countries = load(&mut plan, "in/countries");
    let j = plan.add(
        OpKind::Join {
            keys: vec![vec!["country".into()], vec!["country".into()]],
            join_type: JoinType::Left,
        },
        vec![distinct, countries],
    );
    store(&mut plan, j, "out/users_by_country");
    plan
}
