use std::collections::BTreeMap;

use tracing::{Span, info_span};

use super::TaskConfig;
use crate::{Baggage, BaggageMember, CoreError};

/// Attribute keys identifying a task in spans and baggage.
pub mod attr {
    pub const TASK_ID: &str = "rig.task.id";
    pub const TASK_NAME: &str = "rig.task.name";
    pub const TASK_EXECUTION: &str = "rig.task.execution";
    pub const VERSION_ID: &str = "rig.version.id";
    pub const VERSION_REQUESTER: &str = "rig.version.requester";
    pub const BUILD_ID: &str = "rig.build.id";
    pub const BUILD_NAME: &str = "rig.build.name";
    pub const PROJECT_IDENTIFIER: &str = "rig.project.identifier";
    pub const PROJECT_ID: &str = "rig.project.id";
    pub const DISTRO_ID: &str = "rig.distro.id";
}

impl TaskConfig {
    pub fn task_attribute_map(&self) -> BTreeMap<&'static str, String> {
        self.task_attributes().into_iter().collect()
    }

    pub fn task_attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            (attr::TASK_ID, self.task.id.clone()),
            (attr::TASK_NAME, self.task.display_name.clone()),
            (attr::TASK_EXECUTION, self.task.execution.to_string()),
            (attr::VERSION_ID, self.task.version.clone()),
            (attr::VERSION_REQUESTER, self.task.requester.clone()),
            (attr::BUILD_ID, self.task.build_id.clone()),
            (attr::BUILD_NAME, self.task.build_variant.clone()),
            (attr::PROJECT_IDENTIFIER, self.project_ref.identifier.clone()),
            (attr::PROJECT_ID, self.project_ref.id.clone()),
            (attr::DISTRO_ID, self.task.distro_id.clone()),
        ]
    }

    /// Add every task attribute to `bag`.
    ///
    /// Members that fail validation are skipped and reported together; valid ones are still added.
    pub fn add_task_baggage(&self, bag: &mut Baggage) -> Result<(), CoreError> {
        let mut errors = Vec::new();
        for (key, value) in self.task_attributes() {
            match BaggageMember::new(key, value.as_str()) {
                Ok(member) => bag.set_member(member),
                Err(e) => errors.push(format!("making member for key '{key}' val '{value}': {e}")),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Baggage(errors))
        }
    }

    /// Span carrying the task attributes; the execution loop runs inside it.
    pub fn task_span(&self) -> Span {
        info_span!(
            "task",
            rig.task.id = %self.task.id,
            rig.task.name = %self.task.display_name,
            rig.task.execution = self.task.execution,
            rig.version.id = %self.task.version,
            rig.version.requester = %self.task.requester,
            rig.build.id = %self.task.build_id,
            rig.build.name = %self.task.build_variant,
            rig.project.identifier = %self.project_ref.identifier,
            rig.project.id = %self.project_ref.id,
            rig.distro.id = %self.task.distro_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use rig_model::{Expansions, Project, ProjectRef, Task};

    use super::*;

    fn config(display_name: &str) -> TaskConfig {
        let project = Project::from_yaml("identifier: demo\nbuildvariants:\n  - name: bv\n").unwrap();
        let task = Task {
            id: "t1".into(),
            display_name: display_name.into(),
            execution: 2,
            version: "v1".into(),
            build_variant: "bv".into(),
            distro_id: "ubuntu".into(),
            ..Default::default()
        };
        let project_ref = ProjectRef {
            id: "p1".into(),
            identifier: "demo".into(),
            ..Default::default()
        };
        TaskConfig::new(
            "/tmp",
            None,
            Some(project),
            task,
            Some(project_ref),
            None,
            Expansions::new(),
        )
        .unwrap()
    }

    #[test]
    fn attribute_map_has_ten_keys() {
        let map = config("compile").task_attribute_map();
        assert_eq!(map.len(), 10);
        assert_eq!(map[attr::TASK_EXECUTION], "2");
        assert_eq!(map[attr::PROJECT_IDENTIFIER], "demo");
        assert_eq!(map[attr::DISTRO_ID], "ubuntu");
    }

    #[test]
    fn baggage_keeps_valid_members_on_error() {
        let mut bag = Baggage::new();
        config("compile").add_task_baggage(&mut bag).unwrap();
        assert_eq!(bag.len(), 10);
        assert_eq!(bag.get(attr::TASK_ID), Some("t1"));

        let mut bag = Baggage::new();
        let err = config("unit tests").add_task_baggage(&mut bag).unwrap_err();
        match err {
            CoreError::Baggage(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains(attr::TASK_NAME));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(bag.len(), 9);
        assert!(bag.get(attr::TASK_NAME).is_none());
    }
}
