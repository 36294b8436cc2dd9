//! SecurityAccess (0x27)
//!
//! Authentication is out of scope here: the service is a subfunction
//! dispatch stub. Applications hang their seed/key jobs off this node.

use crate::job::ServiceNode;
use crate::session::{DiagSessionMask, SessionType};

/// The SecurityAccess service branch
pub fn security_access() -> ServiceNode {
    ServiceNode::service(
        0x27,
        2,
        DiagSessionMask::empty()
            .with(SessionType::Extended)
            .with(SessionType::Programming),
    )
}
