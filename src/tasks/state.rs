use std::collections::HashMap;

use super::types::State;

pub fn valid_state_transition(src: &State, dst: &State) -> bool {
    let state_transition_map: HashMap<State, Vec<State>> = {
        let mut map = HashMap::new();
        map.insert(State::Received, vec![State::Building, State::Error]);
        map.insert(State::Building, vec![State::Submitted, State::Error]);
        map.insert(
            State::Submitted,
            vec![State::NetworkAttaching, State::Error],
        );
        map.insert(
            State::NetworkAttaching,
            vec![State::Starting, State::Error],
        );
        map.insert(State::Starting, vec![State::Success, State::Error]);
        map.insert(State::Success, vec![]);
        map.insert(State::Error, vec![]);
        map
    };

    if let Some(valid_states) = state_transition_map.get(src) {
        valid_states.contains(dst)
    } else {
        false
    }
}
