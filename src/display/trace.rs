use crate::graph::{ExpressionKind, NodeId};
use crate::program::ContractProgram;
use crate::solver::SearchReport;
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the program as a dependency tree from the root, one line per
/// node with its committed time, and one summary line per nested program.
/// Times and budgets honor the program's decimals setting.
pub fn format_program(program: &ContractProgram) -> String {
    let mut tracer = Tracer {
        program,
        visited_at_level: HashMap::new(),
        output: String::new(),
    };
    let _ = writeln!(tracer.output, "PROGRAM TREE for contract program {}:", program.id());
    let _ = writeln!(tracer.output, "--------------------------------------------------");
    tracer.trace_node(program.dag().root(), 1, "");
    tracer.output
}

/// Renders a search outcome: the utility summary, and the per-candidate
/// convergence table when the run was verbose. Utilities are scaled and
/// rounded the way the program is configured to display them.
pub fn format_report(program: &ContractProgram, report: &SearchReport) -> String {
    let scale = program.scale();
    let decimals = program.decimals();
    let mut output = String::new();

    let _ = writeln!(output, "SEARCH SUMMARY for contract program {}:", program.id());
    let _ = writeln!(output, "--------------------------------------------------");
    let _ = writeln!(output, "  EU(initial): {:.*}", decimals, report.initial_utility * scale);
    let _ = writeln!(output, "  EU(final):   {:.*}", decimals, report.final_utility * scale);
    let _ = writeln!(output, "  rounds: {}  commits: {}", report.rounds, report.commits);

    if let Some(trace) = &report.trace {
        if !trace.is_empty() {
            let _ = writeln!(output, "  --- Search Convergence ---");
            let _ = writeln!(
                output,
                "   round       move        step  EU(adjusted)  EU(original)"
            );
            for record in trace {
                let movement = format!("{}->{}", record.donor, record.recipient);
                let _ = writeln!(
                    output,
                    "  {: >6} {: >10} {: >11.4e} {: >13.*} {: >13.*}",
                    record.round,
                    movement,
                    record.step,
                    decimals,
                    record.candidate_utility * scale,
                    decimals,
                    record.current_utility * scale,
                );
            }
        }
    }
    output
}

struct Tracer<'a> {
    program: &'a ContractProgram,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, node_id: NodeId, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
            let _ = writeln!(self.output, "{}-> (Ref to L{})", prefix, first_seen);
            return;
        }
        self.visited_at_level.insert(node_id, level);

        let Some(node) = self.program.dag().node(node_id) else {
            let _ = writeln!(self.output, "{}[L{}] node {} (missing)", prefix, level, node_id);
            return;
        };
        let time = format_time(self.program.allocations().time(node_id), self.program.decimals());
        let _ = writeln!(
            self.output,
            "{}[L{}] node {} ({}) [{}]",
            prefix,
            level,
            node_id,
            node.kind.label(),
            time
        );

        let stem = build_child_stem(prefix);
        match &node.kind {
            ExpressionKind::Conditional(expr) => {
                self.subprogram_line(&stem, "true branch", &expr.on_true);
                self.subprogram_line(&stem, "false branch", &expr.on_false);
            }
            ExpressionKind::Loop(expr) => {
                let label = format!("loop body (x{})", expr.iterations);
                self.subprogram_line(&stem, &label, &expr.body);
            }
            ExpressionKind::Contract => {}
        }

        // Summarized members render under their dispatch node's subprogram
        // lines, never as tree nodes of this level.
        let dependencies: Vec<NodeId> = node
            .parents
            .iter()
            .copied()
            .filter(|&p| self.program.dag().node(p).is_some_and(|n| !n.in_subtree))
            .collect();
        for (i, &parent) in dependencies.iter().enumerate() {
            let connector = if i == dependencies.len() - 1 { "`-- " } else { "|-- " };
            let full_prefix = format!("{}{}", stem, connector);
            self.trace_node(parent, level + 1, &full_prefix);
        }
    }

    fn subprogram_line(&mut self, stem: &str, label: &str, sub: &ContractProgram) {
        let decimals = self.program.decimals();
        let times: Vec<String> = sub
            .allocations()
            .iter()
            .map(|entry| format_time(entry.time, decimals))
            .collect();
        let _ = writeln!(
            self.output,
            "{}|   {}: program {} (budget {:.*}) times [{}]",
            stem,
            label,
            sub.id(),
            decimals,
            sub.budget(),
            times.join(", ")
        );
        // Deeper nesting shows as further indented summary lines.
        let nested_stem = format!("{}|   ", stem);
        for node in sub.dag().nodes() {
            if node.in_subtree {
                continue;
            }
            match &node.kind {
                ExpressionKind::Conditional(expr) => {
                    self.subprogram_line(&nested_stem, "true branch", &expr.on_true);
                    self.subprogram_line(&nested_stem, "false branch", &expr.on_false);
                }
                ExpressionKind::Loop(expr) => {
                    let label = format!("loop body (x{})", expr.iterations);
                    self.subprogram_line(&nested_stem, &label, &expr.body);
                }
                ExpressionKind::Contract => {}
            }
        }
    }
}

fn format_time(time: Option<f64>, decimals: usize) -> String {
    match time {
        Some(t) => format!("{:.*}", decimals, t),
        None => "-".to_string(),
    }
}

fn build_child_stem(current_prefix: &str) -> String {
    current_prefix.replace("`-- ", "    ").replace("|-- ", "|   ")
}
