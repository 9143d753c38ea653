use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use trustgate::CallContext;
use trustgate::http::Headers;
use trustgate::identity::Identity;
use trustgate::propagation::{parse_signed_request, sign_headers};
use trustgate::security::StaticSecret;
use trustgate::security::signature::{sign, verify};

proptest! {
    #[test]
    fn signature_verifies_under_its_own_secret(
        secret in vec(any::<u8>(), 1..64),
        payload in vec(any::<u8>(), 0..256),
    ) {
        prop_assert!(verify(&sign(&secret, &payload), &payload, &secret));
    }

    #[test]
    fn signature_fails_under_any_other_secret(
        secret in vec(any::<u8>(), 1..64),
        other in vec(any::<u8>(), 1..64),
        payload in vec(any::<u8>(), 0..256),
    ) {
        prop_assume!(secret != other);
        prop_assert!(!verify(&sign(&secret, &payload), &payload, &other));
    }

    #[test]
    fn signature_fails_for_altered_payload(
        secret in vec(any::<u8>(), 1..64),
        payload in vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
    ) {
        let mut altered = payload.clone();
        let i = index.index(altered.len());
        altered[i] ^= 0x01;
        prop_assert!(!verify(&sign(&secret, &payload), &altered, &secret));
    }

    #[test]
    fn caller_survives_a_hop(
        id in 1u32..,
        email in "[a-z]{1,8}@[a-z]{1,8}\\.[a-z]{2,3}",
        session in "[A-Za-z0-9]{0,16}",
        roles in btree_set("[a-z]{1,6}(\\.[a-z]{1,6})?", 0..4),
        request_id in "[a-z0-9-]{1,24}",
    ) {
        let mut identity = Identity::new(id, email).with_session(session);
        identity.roles = roles;
        let call = CallContext::authenticated(identity.clone()).with_request_id(request_id.clone());
        let secret = StaticSecret::new("prop-secret");

        let mut headers = Headers::new();
        sign_headers(&call, &secret, &mut headers).unwrap();
        let received = parse_signed_request(&headers, &CallContext::new(), &secret).unwrap();

        prop_assert_eq!(received.identity(), Some(&identity));
        prop_assert_eq!(received.request_id(), Some(request_id.as_str()));
    }
}
