use std::collections::HashSet;

use spanlens_core::time::Granularity;
use spanlens_metrics::definition::{MetricKind, MetricType, Operator};
use spanlens_metrics::defs::builtin_definitions;
use spanlens_metrics::{MetricCatalog, Wrapper};

fn expected_base_expression(name: &str, g: Granularity) -> Option<String> {
    let per_min = g.seconds() / 60;
    let per_sec = g.seconds();
    let expr = match name {
        "general_total_count"
        | "general_tool_total_count"
        | "service_trace_count"
        | "service_span_count"
        | "tool_total_count"
        | "tool_total_count_pie"
        | "tool_error_code_pie"
        | "service_execution_step_count"
        | "model_total_count"
        | "model_total_count_pie"
        | "model_error_code_pie" => "count()".to_string(),
        "general_fail_ratio" | "general_model_fail_ratio" | "general_tool_fail_ratio" => {
            "countIf(1, status_code != 0) / count()".to_string()
        }
        "model_success_ratio" | "service_success_ratio" | "tool_success_ratio" => {
            "countIf(1, status_code = 0) / count()".to_string()
        }
        "general_model_total_tokens" | "model_token_count" | "model_token_count_pie" => {
            "sum(input_tokens + output_tokens)".to_string()
        }
        "model_duration" | "service_duration" | "tool_duration" => "duration/1000".to_string(),
        "model_ttft" => "latency_first_resp/1000".to_string(),
        "model_input_token_count" => "sum(input_tokens)".to_string(),
        "model_output_token_count" => "sum(output_tokens)".to_string(),
        "model_system_token_count" => "sum(model_system_tokens)".to_string(),
        "model_tool_choice_token_count" => "sum(model_tool_choice_tokens)".to_string(),
        "model_tpm" => "(input_tokens+output_tokens)/(duration / 60000000)".to_string(),
        "model_tps" => "(input_tokens+output_tokens)/(duration / 1000000)".to_string(),
        "model_tpot" => "(duration-latency_first_resp)/(1000*output_tokens)".to_string(),
        "model_qpm_all" | "service_qpm_all" => format!("count()/{per_min}"),
        "model_qpm_fail" | "service_qpm_fail" => format!("countIf(1, status_code != 0)/{per_min}"),
        "model_qpm_success" | "service_qpm_success" => {
            format!("countIf(1, status_code = 0)/{per_min}")
        }
        "model_qps_all" | "service_qps_all" => format!("count()/{per_sec}"),
        "model_qps_fail" | "service_qps_fail" => format!("countIf(1, status_code != 0)/{per_sec}"),
        "model_qps_success" | "service_qps_success" => {
            format!("countIf(1, status_code = 0)/{per_sec}")
        }
        "service_message_count" => "uniq(message_id)".to_string(),
        "service_user_count" => "uniq(user_id)".to_string(),
        "model_total_error_count"
        | "service_trace_error_count"
        | "service_span_error_count"
        | "tool_total_error_count" => "countIf(1, status_code != 0)".to_string(),
        "model_total_success_count"
        | "service_trace_success_count"
        | "service_span_success_count"
        | "tool_total_success_count" => "countIf(1, status_code = 0)".to_string(),
        "const_minute" => "1".to_string(),
        _ => return None,
    };
    Some(expr)
}

const DISTRIBUTION_SUFFIXES: [(&str, &str); 6] = [
    ("_avg", "avg"),
    ("_min", "min"),
    ("_max", "max"),
    ("_pct50", "quantile(0.5)"),
    ("_pct90", "quantile(0.9)"),
    ("_pct99", "quantile(0.99)"),
];

#[test]
fn every_direct_metric_renders_all_of_its_fields() {
    let catalog = MetricCatalog::builtin().unwrap();
    for def in catalog.iter() {
        let defs = match def.kind() {
            MetricKind::Direct => vec![def],
            MetricKind::Composite => def.metrics().iter().collect(),
        };
        for d in defs {
            for g in Granularity::ALL {
                let expr = d.expression(g).unwrap();
                assert!(!expr.expression.is_empty(), "{} renders empty", d.name());
                assert_eq!(
                    expr.expression.matches("%s").count(),
                    expr.fields.len(),
                    "placeholder mismatch for {}",
                    d.name()
                );
                let rendered = expr.render().unwrap();
                for field in &expr.fields {
                    assert!(
                        rendered.contains(&field.field_name),
                        "{} missing field {}",
                        d.name(),
                        field.field_name
                    );
                }
            }
        }
    }
}

#[test]
fn rendered_expressions_match_the_reference_table() {
    let catalog = MetricCatalog::builtin().unwrap();
    let mut checked = 0;
    for g in Granularity::ALL {
        for def in catalog.iter().filter(|d| d.kind() == MetricKind::Direct) {
            let rendered = def.expression(g).unwrap().render().unwrap();
            let name = def.name();
            if let Some(expected) = expected_base_expression(name, g) {
                assert_eq!(rendered, expected, "{name} at {g}");
                checked += 1;
                continue;
            }
            if let Some(base) = name.strip_suffix("_by_time") {
                let expected = expected_base_expression(base, g).unwrap();
                assert_eq!(rendered, expected, "{name} at {g}");
                checked += 1;
                continue;
            }
            let (base, outer) = DISTRIBUTION_SUFFIXES
                .iter()
                .find_map(|(suffix, outer)| name.strip_suffix(suffix).map(|b| (b, *outer)))
                .unwrap_or_else(|| panic!("no reference expression for {name}"));
            let expected = expected_base_expression(base, g).unwrap();
            assert_eq!(rendered, format!("{outer}({expected})"), "{name} at {g}");
            checked += 1;
        }
    }
    assert_eq!(checked, catalog.len() * Granularity::ALL.len() - 5 * Granularity::ALL.len());
}

#[test]
fn names_are_unique_and_families_complete() {
    let base = builtin_definitions();
    assert_eq!(base.len(), 8 + 23 + 7 + 17 + 3 + 1);

    let catalog = MetricCatalog::builtin().unwrap();
    let names: HashSet<&str> = catalog.names().collect();
    assert_eq!(names.len(), catalog.len());

    let expanded: usize = base.iter().map(|d| d.expand().len()).sum();
    assert_eq!(expanded, catalog.len());
}

#[test]
fn wrapped_variants_keep_selection_and_carry_offline_hints() {
    let base = builtin_definitions();
    for def in base.iter().filter(|d| d.is_wrappable()) {
        for w in def.wrappers() {
            let wrapped = w.wrap(def);
            assert!(wrapped.name().starts_with(def.name()));
            assert_eq!(wrapped.scope(), def.scope());
            assert_eq!(wrapped.group_by(), def.group_by());
            assert_eq!(wrapped.source(), def.source());
            assert!(wrapped.o_expression().is_some(), "{}", wrapped.name());
        }
    }
}

#[test]
fn series_wrapper_only_changes_type() {
    let base = builtin_definitions();
    let count = base
        .iter()
        .find(|d| d.name() == "service_trace_count")
        .unwrap();
    let series = Wrapper::TimeSeries.wrap(count);
    assert_eq!(series.name(), "service_trace_count_by_time");
    assert_eq!(series.metric_type(), MetricType::TimeSeries);
    for g in Granularity::ALL {
        assert_eq!(series.expression(g), count.expression(g));
    }
}

#[test]
fn composites_divide_two_direct_metrics() {
    let catalog = MetricCatalog::builtin().unwrap();
    let composites: Vec<&str> = catalog
        .iter()
        .filter(|d| d.kind() == MetricKind::Composite)
        .map(|d| d.name())
        .collect();
    assert_eq!(
        composites,
        vec![
            "general_model_latency_avg",
            "general_tool_latency_avg",
            "agent_step_avg",
            "agent_model_step_avg",
            "agent_tool_step_avg",
        ]
    );
    for name in composites {
        let def = catalog.get(name).unwrap();
        assert_eq!(def.operator(), Some(Operator::Divide));
        assert_eq!(def.metrics().len(), 2);
        assert!(def.metrics().iter().all(|m| m.kind() == MetricKind::Direct));
        assert!(def.o_expression().is_some());
    }
}
