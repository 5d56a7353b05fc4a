//! Port compatibility rules.

use nodes::PortDirection;

use crate::error::ValidationError;
use crate::models::Port;

/// Check whether `source` may feed `target`.
///
/// Rules enforced:
/// 1. The ports must have opposite directions, output first.
/// 2. The target input must not already be connected.
/// 3. The data types must match unless either side is `"any"`.
pub fn is_valid_connection(
    source_node: &str,
    source: &Port,
    target_node: &str,
    target: &Port,
) -> Result<(), ValidationError> {
    match (source.direction, target.direction) {
        (PortDirection::Output, PortDirection::Input) => {}
        (PortDirection::Input, PortDirection::Input) => {
            return Err(ValidationError::SameDirection("input"))
        }
        (PortDirection::Output, PortDirection::Output) => {
            return Err(ValidationError::SameDirection("output"))
        }
        (PortDirection::Input, PortDirection::Output) => {
            return Err(ValidationError::WrongDirection)
        }
    }

    if target.connected {
        return Err(ValidationError::InputAlreadyConnected {
            node_id: target_node.to_owned(),
            port_id: target.id.clone(),
        });
    }

    if !(source.accepts_any() || target.accepts_any() || source.data_type == target.data_type) {
        return Err(ValidationError::TypeMismatch {
            source_type: source.data_type.clone(),
            target_type: target.data_type.clone(),
        });
    }

    tracing::trace!(source_node, target_node, "connection accepted");
    Ok(())
}

/// The data type a connection between two compatible ports carries.
pub(crate) fn connection_type(source: &Port, target: &Port) -> String {
    if source.accepts_any() {
        target.data_type.clone()
    } else {
        source.data_type.clone()
    }
}
