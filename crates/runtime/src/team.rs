//! Team: the directory of agents by name.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{agent::Agent, error::RuntimeError};

/// Directory of agents with a designated root.
///
/// Construction validates the wiring: unique names, resolvable sub-agent
/// references, and an acyclic delegation graph.
pub struct Team {
    agents: HashMap<String, Arc<Agent>>,
    root: String,
}

impl Team {
    pub fn new(agents: Vec<Agent>, root: impl Into<String>) -> crate::Result<Self> {
        let root = root.into();
        let mut by_name = HashMap::with_capacity(agents.len());

        for agent in agents {
            let name = agent.name().to_string();
            if by_name.insert(name.clone(), Arc::new(agent)).is_some() {
                return Err(RuntimeError::InvalidConfig(format!(
                    "duplicate agent name '{name}'"
                )));
            }
        }

        if !by_name.contains_key(&root) {
            return Err(RuntimeError::UnknownAgent(root));
        }

        for agent in by_name.values() {
            for sub in agent.sub_agent_names() {
                if !by_name.contains_key(sub) {
                    return Err(RuntimeError::InvalidConfig(format!(
                        "agent '{}' references unknown sub-agent '{sub}'",
                        agent.name()
                    )));
                }
            }
        }

        let team = Self {
            agents: by_name,
            root,
        };
        team.ensure_acyclic()?;

        Ok(team)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Agent>> {
        self.agents.get(name)
    }

    pub fn root(&self) -> &Arc<Agent> {
        self.agents
            .get(&self.root)
            .expect("root agent validated at construction")
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Description of a sub-agent, for the transfer tool prompt.
    pub(crate) fn describe(&self, name: &str) -> Option<String> {
        self.agents
            .get(name)
            .map(|agent| match agent.description() {
                Some(description) => format!("{name}: {description}"),
                None => name.to_string(),
            })
    }

    fn ensure_acyclic(&self) -> crate::Result<()> {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();

        for name in self.agents.keys() {
            self.visit(name, &mut visiting, &mut visited)?;
        }

        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        visiting: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> crate::Result<()> {
        if visited.contains(name) {
            return Ok(());
        }

        if !visiting.insert(name) {
            return Err(RuntimeError::InvalidConfig(format!(
                "delegation cycle through agent '{name}'"
            )));
        }

        if let Some(agent) = self.agents.get(name) {
            for sub in agent.sub_agent_names() {
                self.visit(sub, visiting, visited)?;
            }
        }

        visiting.remove(name);
        visited.insert(name);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Team::new(
            vec![Agent::new("a", ""), Agent::new("a", "")],
            "a",
        )
        .err()
        .expect("duplicate should fail");

        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_root_is_rejected() {
        let err = Team::new(vec![Agent::new("a", "")], "missing")
            .err()
            .expect("unknown root should fail");

        assert!(matches!(err, RuntimeError::UnknownAgent(_)));
    }

    #[test]
    fn unresolved_sub_agent_is_rejected() {
        let ghost = Agent::new("ghost", "");
        let root = Agent::new("root", "").with_sub_agents(vec![&ghost]);

        let err = Team::new(vec![root], "root").err().expect("should fail");
        assert!(err.to_string().contains("unknown sub-agent"));
    }

    #[test]
    fn delegation_cycles_are_rejected() {
        // a → b → a
        let b_stub = Agent::new("b", "");
        let a = Agent::new("a", "").with_sub_agents(vec![&b_stub]);
        let a_stub = Agent::new("a", "");
        let b = Agent::new("b", "").with_sub_agents(vec![&a_stub]);

        let err = Team::new(vec![a, b], "a").err().expect("cycle should fail");
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn valid_team_resolves_agents() {
        let child = Agent::new("child", "assist");
        let root = Agent::new("root", "coordinate").with_sub_agents(vec![&child]);

        let team = Team::new(vec![root, child], "root").expect("team");

        assert_eq!(team.root().name(), "root");
        assert!(team.get("child").is_some());
        assert_eq!(team.describe("child").as_deref(), Some("child"));
    }
}
