//! Property tests for the condition model: serde fixed points and the
//! boolean laws of the combinator tree.

use proptest::prelude::*;

use hookflow::domain::models::{
    Action, ActionType, Conditions, Event, ExecutionContext, LogicalOperator, Rule,
};
use hookflow::services::evaluator::ConditionEvaluator;

fn leaf_strategy() -> impl Strategy<Value = Conditions> {
    (
        proptest::sample::subsequence(vec!["push", "release", "issues"], 0..=2),
        proptest::sample::subsequence(vec!["opened", "closed"], 0..=1),
        proptest::option::of(prop_oneof![Just("acme"), Just("globex")]),
        proptest::option::of(prop_oneof![Just("octocat"), Just("robot")]),
    )
        .prop_map(|(event_types, actions, organization, sender)| Conditions {
            event_types: event_types.into_iter().map(String::from).collect(),
            actions: actions.into_iter().map(String::from).collect(),
            organization: organization.map(String::from),
            sender: sender.map(String::from),
            ..Default::default()
        })
}

fn tree_strategy() -> impl Strategy<Value = Conditions> {
    leaf_strategy().prop_recursive(3, 24, 3, |inner| {
        (
            prop_oneof![Just(LogicalOperator::And), Just(LogicalOperator::Or)],
            proptest::collection::vec(inner, 1..=3),
        )
            .prop_map(|(op, subs)| Conditions {
                logical_operator: Some(op),
                sub_conditions: subs,
                ..Default::default()
            })
    })
}

fn event_strategy() -> impl Strategy<Value = Event> {
    (
        prop_oneof![Just("push"), Just("release"), Just("issues")],
        proptest::option::of(prop_oneof![Just("opened"), Just("closed")]),
        prop_oneof![Just("acme"), Just("globex")],
        prop_oneof![Just("octocat"), Just("robot")],
    )
        .prop_map(|(event_type, action, org, sender)| {
            let mut event = Event::new(event_type, org).with_sender(sender);
            event.action = action.map(String::from);
            event
        })
}

fn context(event: &Event) -> ExecutionContext {
    ExecutionContext::from_event(event, "test")
}

proptest! {
    #[test]
    fn conditions_serde_is_a_fixed_point(conditions in tree_strategy()) {
        let json = serde_json::to_value(&conditions).unwrap();
        let parsed: Conditions = serde_json::from_value(json.clone()).unwrap();
        let json2 = serde_json::to_value(&parsed).unwrap();
        prop_assert_eq!(json, json2);
    }

    #[test]
    fn rule_document_serde_is_a_fixed_point(conditions in tree_strategy()) {
        let rule = Rule::new("prop-rule", "acme")
            .with_conditions(conditions)
            .with_action(
                Action::new("a1", ActionType::Notification)
                    .with_parameter("message", serde_json::json!("m")),
            );
        let json = serde_json::to_value(&rule).unwrap();
        let parsed: Rule = serde_json::from_value(json.clone()).unwrap();
        let json2 = serde_json::to_value(&parsed).unwrap();
        prop_assert_eq!(json, json2);
    }

    #[test]
    fn not_negates_its_child(child in tree_strategy(), event in event_strategy()) {
        let evaluator = ConditionEvaluator::default();
        let ctx = context(&event);

        let plain = evaluator.evaluate(&child, &event, &ctx);
        let negated = Conditions {
            logical_operator: Some(LogicalOperator::Not),
            sub_conditions: vec![child],
            ..Default::default()
        };
        let inverted = evaluator.evaluate(&negated, &event, &ctx);
        prop_assert_eq!(inverted.matched, !plain.matched);
    }

    #[test]
    fn and_is_conjunction_or_is_disjunction(
        children in proptest::collection::vec(leaf_strategy(), 1..4),
        event in event_strategy(),
    ) {
        let evaluator = ConditionEvaluator::default();
        let ctx = context(&event);

        let individual: Vec<bool> = children
            .iter()
            .map(|c| evaluator.evaluate(c, &event, &ctx).matched)
            .collect();

        let and_node = Conditions {
            logical_operator: Some(LogicalOperator::And),
            sub_conditions: children.clone(),
            ..Default::default()
        };
        let or_node = Conditions {
            logical_operator: Some(LogicalOperator::Or),
            sub_conditions: children,
            ..Default::default()
        };

        prop_assert_eq!(
            evaluator.evaluate(&and_node, &event, &ctx).matched,
            individual.iter().all(|m| *m)
        );
        prop_assert_eq!(
            evaluator.evaluate(&or_node, &event, &ctx).matched,
            individual.iter().any(|m| *m)
        );
    }

    #[test]
    fn evaluation_is_deterministic(conditions in tree_strategy(), event in event_strategy()) {
        let evaluator = ConditionEvaluator::default();
        let ctx = context(&event);
        let first = evaluator.evaluate(&conditions, &event, &ctx).matched;
        let second = evaluator.evaluate(&conditions, &event, &ctx).matched;
        prop_assert_eq!(first, second);
    }

    #[test]
    fn well_formed_trees_validate(conditions in tree_strategy()) {
        let evaluator = ConditionEvaluator::default();
        let validation = evaluator.validate(&conditions);
        prop_assert!(validation.valid);
        prop_assert_eq!(validation.score, 100);
    }
}
