//! A scoped collection of match and reply registrations, cancelled in
//! reverse order when the owning `State` is reset or dropped.

use crate::connection::{MatchId, ReplyId};

enum Registration {
    Match(MatchId),
    Reply(ReplyId),
}

/// Tracks every registration an owner has installed on a [`Connection`][
/// crate::connection::Connection] so they can all be cancelled together,
/// regardless of which one outlives the others.
pub struct State {
    registrations: Vec<Registration>,
}

impl State {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    pub fn track_match(&mut self, id: MatchId) {
        self.registrations.push(Registration::Match(id));
    }

    pub fn track_reply(&mut self, id: ReplyId) {
        self.registrations.push(Registration::Reply(id));
    }

    /// Remove every registration this state owns, in reverse registration
    /// order, via `connection`. After this call the state is empty.
    pub fn reset(&mut self, connection: &mut crate::connection::Connection) {
        while let Some(registration) = self.registrations.pop() {
            match registration {
                Registration::Match(id) => connection.remove_match(id),
                Registration::Reply(id) => connection.remove_reply(id),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionBuilder, MatchFlow};
    use crate::match_rule::MatchRule;

    #[test]
    fn reset_removes_everything_it_tracked() {
        let mut sent = Vec::new();
        let mut connection = ConnectionBuilder::new()
            .build(move |bytes| {
                sent.extend_from_slice(bytes);
                Ok(())
            });
        let mut state = State::new();
        let id = connection.add_match(MatchRule::new(), Box::new(|_, _| MatchFlow::Continue));
        state.track_match(id);
        assert!(!state.is_empty());
        state.reset(&mut connection);
        assert!(state.is_empty());
        assert!(connection.match_count() == 0);
    }

    fn _type_check(_: Connection) {}
}
