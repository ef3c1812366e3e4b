use super::{ConnectionRequest, ConnectionStatus, RequestStatus};

/// The request deciding the relationship between `me` and `target`. Rejected
/// requests never block, and the first match wins.
pub fn find_request<'a>(requests: &'a [ConnectionRequest], me: &str, target: &str) -> Option<&'a ConnectionRequest> {
    requests
        .iter()
        .find(|r| r.status != RequestStatus::Rejected && r.involves(me, target))
}

pub fn resolve_status(requests: &[ConnectionRequest], me: &str, target: &str) -> ConnectionStatus {
    match find_request(requests, me, target) {
        None => ConnectionStatus::None,
        Some(r) if r.status == RequestStatus::Accepted => ConnectionStatus::Connected,
        Some(r) if r.sender_id == me => ConnectionStatus::Sent,
        Some(_) => ConnectionStatus::Received,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use time::OffsetDateTime;

    use super::*;

    fn request(id: &str, sender: &str, receiver: &str, status: RequestStatus) -> ConnectionRequest {
        ConnectionRequest {
            id: id.to_owned(),
            sender_id: sender.to_owned(),
            receiver_id: receiver.to_owned(),
            status,
            message: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[rstest]
    #[case::nothing(vec![], ConnectionStatus::None)]
    #[case::sent(vec![request("1", "a", "b", RequestStatus::Pending)], ConnectionStatus::Sent)]
    #[case::received(vec![request("1", "b", "a", RequestStatus::Pending)], ConnectionStatus::Received)]
    #[case::accepted_outgoing(vec![request("1", "a", "b", RequestStatus::Accepted)], ConnectionStatus::Connected)]
    #[case::accepted_incoming(vec![request("1", "b", "a", RequestStatus::Accepted)], ConnectionStatus::Connected)]
    #[case::rejected(vec![request("1", "a", "b", RequestStatus::Rejected)], ConnectionStatus::None)]
    #[case::rejected_then_resent(
        vec![request("1", "b", "a", RequestStatus::Rejected), request("2", "a", "b", RequestStatus::Pending)],
        ConnectionStatus::Sent
    )]
    #[case::other_pairs_ignored(
        vec![request("1", "a", "c", RequestStatus::Accepted), request("2", "c", "b", RequestStatus::Pending)],
        ConnectionStatus::None
    )]
    fn resolves(#[case] requests: Vec<ConnectionRequest>, #[case] expected: ConnectionStatus) {
        assert_eq!(resolve_status(&requests, "a", "b"), expected);
        // the relation is symmetric, seen from the other side
        assert_eq!(resolve_status(&requests, "b", "a"), expected.mirror());
    }

    #[test]
    fn first_match_wins() {
        let requests = vec![
            request("1", "a", "b", RequestStatus::Pending),
            request("2", "b", "a", RequestStatus::Accepted),
        ];
        assert_eq!(find_request(&requests, "a", "b").map(|r| r.id.as_str()), Some("1"));
        assert_eq!(resolve_status(&requests, "a", "b"), ConnectionStatus::Sent);
    }

    #[test]
    fn self_is_always_none() {
        let requests = vec![request("1", "a", "b", RequestStatus::Accepted)];
        assert_eq!(resolve_status(&requests, "a", "a"), ConnectionStatus::None);
    }
}
