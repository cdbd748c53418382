//! Decryption request and response domains

use serde::{Deserialize, Serialize};

use super::{
    rollup_confirmation, Action, DomainDescriptor, DomainKind, Entity, FieldReader, FieldWriter,
    FoldContext, Placement, TreeShape,
};
use crate::merkle::commit_leaf;
use crate::types::Result;

const TAG_INITIALIZE: u64 = 0;
const TAG_RESOLVE: u64 = 1;
const TAG_ABORT: u64 = 2;

const TAG_RESPOND: u64 = 0;

const REQUEST_TREE_HEIGHT: u8 = 16;
const RESPONSE_TREE_HEIGHT: u8 = 5;

pub static REQUEST: DomainDescriptor = DomainDescriptor {
    kind: DomainKind::Request,
    address_key: "REQUEST_ADDRESS",
    shape: TreeShape {
        level1_height: REQUEST_TREE_HEIGHT,
        level2_height: None,
    },
    root_field: 0,
    action_state_field: 1,
    decode: decode_request,
    entity_key: request_key,
    transition: request_transition,
    action_slot: request_slot,
    decode_confirmation: rollup_confirmation,
};

pub static RESPONSE: DomainDescriptor = DomainDescriptor {
    kind: DomainKind::Response,
    address_key: "RESPONSE_ADDRESS",
    shape: TreeShape {
        level1_height: REQUEST_TREE_HEIGHT,
        level2_height: Some(RESPONSE_TREE_HEIGHT),
    },
    root_field: 0,
    action_state_field: 1,
    decode: decode_response,
    entity_key: response_key,
    transition: response_transition,
    action_slot: response_slot,
    decode_confirmation: rollup_confirmation,
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Initialized,
    Resolved,
    Aborted,
}

impl RequestStatus {
    fn code(&self) -> u64 {
        match self {
            Self::Initialized => 1,
            Self::Resolved => 2,
            Self::Aborted => 3,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestAction {
    Initialize {
        request_id: u64,
        key_index: u64,
        requester: String,
        deadline: u64,
    },
    Resolve {
        request_id: u64,
        result: String,
    },
    Abort {
        request_id: u64,
    },
}

impl RequestAction {
    pub fn request_id(&self) -> u64 {
        match *self {
            Self::Initialize { request_id, .. }
            | Self::Resolve { request_id, .. }
            | Self::Abort { request_id } => request_id,
        }
    }

    pub fn encode(&self) -> Vec<String> {
        match self {
            Self::Initialize {
                request_id,
                key_index,
                requester,
                deadline,
            } => FieldWriter::tag(TAG_INITIALIZE)
                .u64(*request_id)
                .u64(*key_index)
                .string(requester)
                .u64(*deadline)
                .build(),
            Self::Resolve { request_id, result } => FieldWriter::tag(TAG_RESOLVE)
                .u64(*request_id)
                .string(result)
                .build(),
            Self::Abort { request_id } => FieldWriter::tag(TAG_ABORT).u64(*request_id).build(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub request_id: u64,
    pub key_index: u64,
    pub requester: String,
    pub deadline: u64,
    pub result: Option<String>,
    pub aborted: bool,
    pub status: RequestStatus,
}

impl Request {
    fn empty(request_id: u64) -> Self {
        Self {
            request_id,
            key_index: 0,
            requester: String::new(),
            deadline: 0,
            result: None,
            aborted: false,
            status: RequestStatus::Initialized,
        }
    }

    /// Abort wins over resolve; both are terminal
    fn resolve_status(&self) -> RequestStatus {
        if self.aborted {
            RequestStatus::Aborted
        } else if self.result.is_some() {
            RequestStatus::Resolved
        } else {
            RequestStatus::Initialized
        }
    }

    pub fn placement(&self) -> Placement {
        Placement {
            level1: self.request_id,
            level2: None,
            leaf: commit_leaf(&[
                &self.key_index.to_be_bytes(),
                self.requester.as_bytes(),
                &self.deadline.to_be_bytes(),
                &self.status.code().to_be_bytes(),
                self.result.as_deref().unwrap_or("").as_bytes(),
            ]),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseAction {
    Respond {
        request_id: u64,
        member_id: u64,
        data: Vec<String>,
    },
}

impl ResponseAction {
    pub fn encode(&self) -> Vec<String> {
        let Self::Respond {
            request_id,
            member_id,
            data,
        } = self;
        FieldWriter::tag(TAG_RESPOND)
            .u64(*request_id)
            .u64(*member_id)
            .list(data)
            .build()
    }
}

/// One committee member's decryption share for a request
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResponseShare {
    pub request_id: u64,
    pub member_id: u64,
    pub data: Vec<String>,
}

impl ResponseShare {
    pub fn placement(&self) -> Placement {
        let parts: Vec<&[u8]> = self.data.iter().map(|d| d.as_bytes()).collect();
        Placement {
            level1: self.request_id,
            level2: Some(self.member_id),
            leaf: commit_leaf(&parts),
        }
    }
}

fn decode_request(fields: &[String]) -> Result<Action> {
    let mut r = FieldReader::new(DomainKind::Request, fields);
    let action = match r.u64("tag")? {
        TAG_INITIALIZE => RequestAction::Initialize {
            request_id: r.u64("request_id")?,
            key_index: r.u64("key_index")?,
            requester: r.string("requester")?,
            deadline: r.u64("deadline")?,
        },
        TAG_RESOLVE => RequestAction::Resolve {
            request_id: r.u64("request_id")?,
            result: r.string("result")?,
        },
        TAG_ABORT => RequestAction::Abort {
            request_id: r.u64("request_id")?,
        },
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(Action::Request(action))
}

fn request_key(action: &Action, _action_id: u64) -> Option<String> {
    match action {
        Action::Request(a) => Some(a.request_id().to_string()),
        _ => None,
    }
}

fn request_transition(
    current: Option<&Entity>,
    action: &Action,
    _ctx: &FoldContext,
) -> Option<Entity> {
    let Action::Request(action) = action else {
        return None;
    };
    let mut request = match current {
        Some(Entity::Request(r)) => r.clone(),
        Some(_) => return None,
        None => Request::empty(action.request_id()),
    };
    match action {
        RequestAction::Initialize {
            key_index,
            requester,
            deadline,
            ..
        } => {
            request.key_index = *key_index;
            request.requester = requester.clone();
            request.deadline = *deadline;
        }
        RequestAction::Resolve { result, .. } => {
            if request.result.is_none() {
                request.result = Some(result.clone());
            }
        }
        RequestAction::Abort { .. } => request.aborted = true,
    }
    request.status = request.resolve_status();
    Some(Entity::Request(request))
}

fn request_slot(action: &Action, _action_id: u64) -> Option<(u64, Option<u64>)> {
    match action {
        Action::Request(a) => Some((a.request_id(), None)),
        _ => None,
    }
}

fn decode_response(fields: &[String]) -> Result<Action> {
    let mut r = FieldReader::new(DomainKind::Response, fields);
    let action = match r.u64("tag")? {
        TAG_RESPOND => ResponseAction::Respond {
            request_id: r.u64("request_id")?,
            member_id: r.u64("member_id")?,
            data: r.list("data")?,
        },
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(Action::Response(action))
}

fn response_key(action: &Action, _action_id: u64) -> Option<String> {
    match action {
        Action::Response(ResponseAction::Respond {
            request_id,
            member_id,
            ..
        }) => Some(format!("{}:{}", request_id, member_id)),
        _ => None,
    }
}

fn response_transition(
    current: Option<&Entity>,
    action: &Action,
    _ctx: &FoldContext,
) -> Option<Entity> {
    let Action::Response(ResponseAction::Respond {
        request_id,
        member_id,
        data,
    }) = action
    else {
        return None;
    };
    if current.is_some() {
        return None;
    }
    Some(Entity::Response(ResponseShare {
        request_id: *request_id,
        member_id: *member_id,
        data: data.clone(),
    }))
}

fn response_slot(action: &Action, _action_id: u64) -> Option<(u64, Option<u64>)> {
    match action {
        Action::Response(ResponseAction::Respond {
            request_id,
            member_id,
            ..
        }) => Some((*request_id, Some(*member_id))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(current: Option<Entity>, action: RequestAction) -> Entity {
        request_transition(current.as_ref(), &Action::Request(action), &FoldContext { action_id: 0 })
            .unwrap()
    }

    #[test]
    fn test_abort_beats_resolve() {
        let init = RequestAction::Initialize {
            request_id: 4,
            key_index: 33,
            requester: "B62qRequester".into(),
            deadline: 1_000,
        };
        let resolved = apply(Some(apply(None, init)), RequestAction::Resolve {
            request_id: 4,
            result: "0xresult".into(),
        });
        let aborted = apply(Some(resolved), RequestAction::Abort { request_id: 4 });
        let Entity::Request(r) = aborted else { panic!() };
        assert_eq!(r.status, RequestStatus::Aborted);
        assert_eq!(r.key_index, 33);
    }

    #[test]
    fn test_decode_roundtrip_all_tags() {
        for action in [
            RequestAction::Initialize {
                request_id: 1,
                key_index: 2,
                requester: "r".into(),
                deadline: 3,
            },
            RequestAction::Resolve {
                request_id: 1,
                result: "x".into(),
            },
            RequestAction::Abort { request_id: 1 },
        ] {
            assert_eq!(decode_request(&action.encode()).unwrap(), Action::Request(action));
        }
    }

    #[test]
    fn test_out_of_tree_ids_still_decode() {
        let abort = RequestAction::Abort { request_id: 1 << REQUEST_TREE_HEIGHT };
        assert!(decode_request(&abort.encode()).is_ok());
        let respond = ResponseAction::Respond {
            request_id: 1,
            member_id: 1 << RESPONSE_TREE_HEIGHT,
            data: vec![],
        };
        let action = decode_response(&respond.encode()).unwrap();
        let entity = response_transition(None, &action, &FoldContext { action_id: 0 }).unwrap();
        let placement = entity.placements()[0];
        assert!(!RESPONSE.shape.holds(&placement));
    }

    #[test]
    fn test_duplicate_response_ignored() {
        let action = Action::Response(ResponseAction::Respond {
            request_id: 1,
            member_id: 0,
            data: vec!["d".into()],
        });
        let ctx = FoldContext { action_id: 0 };
        let first = response_transition(None, &action, &ctx).unwrap();
        assert!(response_transition(Some(&first), &action, &ctx).is_none());
    }
}
