use crate::error::{DomBridgeError, Result};
use crate::protocol::ProfileDescriptor;
use crate::services::registry::ConnectionId;

/// Pick the agent connection a command should be forwarded to.
///
/// Selection order: no agents fails with `NoAgentAvailable`; a single agent
/// is always chosen regardless of targeting; an explicit profile id is
/// matched against `ProfileDescriptor::instance_id`; otherwise the first
/// agent in accept order wins. Tab ownership is not tracked, so the
/// fallback is deliberately coarse.
pub fn select_agent(
    agents: &[(ConnectionId, Option<ProfileDescriptor>)],
    profile_id: Option<&str>,
) -> Result<ConnectionId> {
    if agents.is_empty() {
        return Err(DomBridgeError::NoAgentAvailable);
    }
    if agents.len() == 1 {
        return Ok(agents[0].0);
    }
    if let Some(wanted) = profile_id {
        let matched = agents.iter().find(|(_, profile)| {
            profile
                .as_ref()
                .map(|p| p.instance_id == wanted)
                .unwrap_or(false)
        });
        if let Some((conn_id, _)) = matched {
            return Ok(*conn_id);
        }
    }
    Ok(agents[0].0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiled(conn_id: ConnectionId, instance_id: &str) -> (ConnectionId, Option<ProfileDescriptor>) {
        (conn_id, Some(ProfileDescriptor::new(instance_id, "ext")))
    }

    #[test]
    fn fails_with_no_agents() {
        assert!(matches!(
            select_agent(&[], None),
            Err(DomBridgeError::NoAgentAvailable)
        ));
        assert!(matches!(
            select_agent(&[], Some("p1")),
            Err(DomBridgeError::NoAgentAvailable)
        ));
    }

    #[test]
    fn single_agent_wins_even_against_targeting() {
        let agents = vec![profiled(4, "p4")];
        assert_eq!(select_agent(&agents, Some("somewhere-else")).unwrap(), 4);
    }

    #[test]
    fn profile_match_beats_first_agent() {
        let agents = vec![profiled(1, "p1"), profiled(2, "p2"), (3, None)];
        assert_eq!(select_agent(&agents, Some("p2")).unwrap(), 2);
    }

    #[test]
    fn falls_back_to_first_in_accept_order() {
        let agents = vec![profiled(1, "p1"), profiled(2, "p2")];
        assert_eq!(select_agent(&agents, None).unwrap(), 1);
        assert_eq!(select_agent(&agents, Some("unknown")).unwrap(), 1);
    }
}
