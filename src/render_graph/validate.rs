//! Descriptor validation, run before any GPU resource is created.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::DescriptorError;
use crate::render_graph::descriptor::{PassConfig, PipelineDescriptor, VIEWPORT_TARGET};

/// Name of the single attachment of the implicit viewport target.
pub const VIEWPORT_ATTACHMENT: &str = "Viewport";

impl PipelineDescriptor {
    /// Check the descriptor for dangling references, malformed fractions and cycles.
    ///
    /// Reports the first problem found.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let renders_viewport = |name: &String| {
            self.render_passes
                .get(name)
                .is_some_and(|p| p.output == VIEWPORT_TARGET)
        };

        let flow = self.flow();
        if self.flow.is_none() && flow.is_empty() {
            return Err(DescriptorError::MissingViewport);
        }
        if flow.is_empty() {
            return Err(DescriptorError::EmptyFlow);
        }

        let mut seen = HashSet::new();
        for name in &flow {
            if !self.render_passes.contains_key(name) {
                return Err(DescriptorError::UnknownPass(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(DescriptorError::DuplicateFlowEntry(name.clone()));
            }
        }

        for (name, target) in &self.render_targets {
            for (field, value) in [("size", target.size.0), ("size", target.size.1)] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(invalid_fraction(name, field, value));
                }
            }
        }

        for name in &flow {
            let pass = &self.render_passes[name];
            self.check_pass(name, pass)?;
        }

        if !flow.iter().any(renders_viewport) {
            return Err(DescriptorError::MissingViewport);
        }

        let producers = self.producers(&flow);
        let position: HashMap<&str, usize> = flow
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        for (index, name) in flow.iter().enumerate() {
            let pass = &self.render_passes[name];
            for input in &pass.inputs {
                let (target, _) = PassConfig::split_input(input);
                let Some(sources) = producers.get(target) else {
                    return Err(DescriptorError::UnproducedInput {
                        pass: name.clone(),
                        input: input.clone(),
                    });
                };
                if sources.iter().all(|source| position[source.as_str()] > index) {
                    log::warn!(
                        "Pass '{}' reads '{}' before it is produced this frame; the previous frame's content is used",
                        name,
                        input
                    );
                }
            }
        }

        if let Some(cycle) = self.find_cycle(&flow, &producers) {
            return Err(DescriptorError::Cycle { passes: cycle });
        }

        Ok(())
    }

    fn check_pass(&self, name: &str, pass: &PassConfig) -> Result<(), DescriptorError> {
        if pass.output != VIEWPORT_TARGET && !self.render_targets.contains_key(&pass.output) {
            return Err(DescriptorError::UnknownTarget {
                pass: name.to_string(),
                target: pass.output.clone(),
            });
        }

        for input in &pass.inputs {
            let (target, attachment) = PassConfig::split_input(input);
            let declared = self.render_targets.get(target);
            if declared.is_none() && target != VIEWPORT_TARGET {
                return Err(DescriptorError::UnknownTarget {
                    pass: name.to_string(),
                    target: target.to_string(),
                });
            }
            if let Some(attachment) = attachment {
                let exists = if target == VIEWPORT_TARGET {
                    attachment == VIEWPORT_ATTACHMENT
                } else {
                    declared.is_some_and(|t| t.attachment(attachment).is_some())
                };
                if !exists {
                    return Err(DescriptorError::UnknownAttachment {
                        pass: name.to_string(),
                        target: target.to_string(),
                        attachment: attachment.to_string(),
                    });
                }
            }
        }

        let fractions = [
            ("viewport_size", pass.viewport_size.0, false),
            ("viewport_size", pass.viewport_size.1, false),
            ("scissor", pass.scissor.0, false),
            ("scissor", pass.scissor.1, false),
            ("viewport_offset", pass.viewport_offset.0, true),
            ("viewport_offset", pass.viewport_offset.1, true),
        ];
        for (field, value, zero_allowed) in fractions {
            let low_ok = if zero_allowed { value >= 0.0 } else { value > 0.0 };
            if !value.is_finite() || !low_ok || value > 1.0 {
                return Err(invalid_fraction(name, field, value));
            }
        }

        Ok(())
    }

    /// Passes in the flow producing each target, in flow order.
    fn producers(&self, flow: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut producers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in flow {
            producers
                .entry(self.render_passes[name].output.clone())
                .or_default()
                .push(name.clone());
        }
        producers
    }

    /// Depth-first search over producer -> consumer edges. A pass reading its own output is a
    /// cycle of length one.
    ///
    /// Inputs bind to the first producer of their target in flow order, so only that producer
    /// is a dependency. Later passes writing the same target do not feed the consumer.
    fn find_cycle(
        &self,
        flow: &[String],
        producers: &BTreeMap<String, Vec<String>>,
    ) -> Option<Vec<String>> {
        // consumer -> producers it depends on
        let dependencies: HashMap<&str, Vec<&str>> = flow
            .iter()
            .map(|name| {
                let deps = self.render_passes[name]
                    .input_targets()
                    .filter_map(|target| producers.get(target)?.first())
                    .map(String::as_str)
                    .collect();
                (name.as_str(), deps)
            })
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a str,
            dependencies: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(node.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            stack.push(node);
            for dependency in dependencies.get(node).into_iter().flatten() {
                if let Some(cycle) = visit(dependency, dependencies, marks, stack) {
                    return Some(cycle);
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for name in flow {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(name.as_str(), &dependencies, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }
}

fn invalid_fraction(owner: &str, field: &'static str, value: f32) -> DescriptorError {
    DescriptorError::InvalidFraction {
        owner: owner.to_string(),
        field,
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn descriptor(passes: &str) -> PipelineDescriptor {
        let source = format!(
            r#"
            name = "Test"

            [render_targets.G]
            attachments = [
                {{ name = "normals", format = "RGBA_Float16" }},
                {{ name = "depth", format = "Depth32" }},
            ]

            [render_targets.H]
            attachments = [{{ name = "color", format = "RGBA_Float16" }}]

            {passes}
            "#
        );
        PipelineDescriptor::from_toml_str(&source).unwrap()
    }

    #[test]
    fn test_valid_two_pass_descriptor() {
        let d = descriptor(
            r#"
            [render_passes.A]
            type = "geometry"
            output = "G"

            [render_passes.B]
            type = "quad"
            inputs = ["G.normals"]
            output = "Viewport"
            "#,
        );
        assert!(d.validate().is_ok());
    }

    #[rstest]
    #[case::unknown_output("inputs = []", "Nope")]
    #[case::unknown_input("inputs = [\"Missing.color\"]", "Missing")]
    fn test_unknown_target(#[case] inputs: &str, #[case] expected: &str) {
        let output = if expected == "Nope" { "Nope" } else { "Viewport" };
        let mut d = descriptor(&format!(
            r#"
            [render_passes.A]
            type = "quad"
            {inputs}
            output = "{output}"
            "#
        ));
        d.flow = Some(vec!["A".into()]);
        assert!(matches!(
            d.validate(),
            Err(DescriptorError::UnknownTarget { target, .. }) if target == expected
        ));
    }

    #[test]
    fn test_unknown_attachment() {
        let d = descriptor(
            r#"
            [render_passes.A]
            type = "geometry"
            output = "G"

            [render_passes.B]
            type = "quad"
            inputs = ["G.albedo"]
            output = "Viewport"
            "#,
        );
        assert!(matches!(
            d.validate(),
            Err(DescriptorError::UnknownAttachment { attachment, .. }) if attachment == "albedo"
        ));
    }

    #[test]
    fn test_unknown_flow_entry_and_duplicates() {
        let mut d = descriptor(
            r#"
            [render_passes.A]
            type = "quad"
            output = "Viewport"
            "#,
        );
        d.flow = Some(vec!["A".into(), "Missing".into()]);
        assert!(matches!(d.validate(), Err(DescriptorError::UnknownPass(p)) if p == "Missing"));

        d.flow = Some(vec!["A".into(), "A".into()]);
        assert!(matches!(d.validate(), Err(DescriptorError::DuplicateFlowEntry(p)) if p == "A"));

        d.flow = Some(vec![]);
        assert!(matches!(d.validate(), Err(DescriptorError::EmptyFlow)));
    }

    #[test]
    fn test_missing_viewport() {
        let d = descriptor(
            r#"
            [render_passes.A]
            type = "geometry"
            output = "G"
            "#,
        );
        assert!(matches!(d.validate(), Err(DescriptorError::MissingViewport)));
    }

    #[test]
    fn test_unproduced_input() {
        let d = descriptor(
            r#"
            [render_passes.B]
            type = "quad"
            inputs = ["H"]
            output = "Viewport"
            "#,
        );
        assert!(matches!(
            d.validate(),
            Err(DescriptorError::UnproducedInput { input, .. }) if input == "H"
        ));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut d = descriptor(
            r#"
            [render_passes.A]
            type = "geometry"
            inputs = ["H"]
            output = "G"

            [render_passes.B]
            type = "quad"
            inputs = ["G"]
            output = "H"

            [render_passes.C]
            type = "quad"
            inputs = ["H"]
            output = "Viewport"
            "#,
        );
        d.flow = Some(vec!["A".into(), "B".into(), "C".into()]);
        match d.validate() {
            Err(DescriptorError::Cycle { passes }) => {
                assert!(passes.contains(&"A".to_string()));
                assert!(passes.contains(&"B".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_read_is_a_cycle() {
        let mut d = descriptor(
            r#"
            [render_passes.A]
            type = "quad"
            inputs = ["H"]
            output = "H"

            [render_passes.B]
            type = "quad"
            inputs = ["H"]
            output = "Viewport"
            "#,
        );
        d.flow = Some(vec!["A".into(), "B".into()]);
        assert!(matches!(
            d.validate(),
            Err(DescriptorError::Cycle { passes }) if passes == ["A", "A"]
        ));
    }

    #[test]
    fn test_later_producer_is_allowed() {
        let mut d = descriptor(
            r#"
            [render_passes.A]
            type = "quad"
            inputs = ["H"]
            output = "Viewport"

            [render_passes.B]
            type = "geometry"
            output = "H"
            "#,
        );
        d.flow = Some(vec!["A".into(), "B".into()]);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_second_producer_of_a_read_target_is_not_a_cycle() {
        let mut d = descriptor(
            r#"
            [render_passes.A]
            type = "geometry"
            output = "G"

            [render_passes.B]
            type = "quad"
            inputs = ["G"]
            output = "H"

            [render_passes.C]
            type = "quad"
            inputs = ["H"]
            output = "G"
            blit_inputs = true

            [render_passes.V]
            type = "quad"
            inputs = ["G"]
            output = "Viewport"
            "#,
        );
        d.flow = Some(vec!["A".into(), "B".into(), "C".into(), "V".into()]);
        assert!(d.validate().is_ok());
    }

    #[rstest]
    #[case("viewport_size = [0.0, 1.0]")]
    #[case("viewport_size = [1.5, 1.0]")]
    #[case("viewport_offset = [-0.1, 0.0]")]
    #[case("scissor = [1.0, 0.0]")]
    fn test_invalid_fractions(#[case] field: &str) {
        let d = descriptor(&format!(
            r#"
            [render_passes.A]
            type = "quad"
            output = "Viewport"
            {field}
            "#
        ));
        assert!(matches!(d.validate(), Err(DescriptorError::InvalidFraction { .. })));
    }
}
