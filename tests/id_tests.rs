use proptest::prelude::*;

use ikepool::dn::{same_dn, same_dn_any_order};
use ikepool::id::Id;

fn parse(s: &str) -> Id<'_> {
    Id::parse(s, false).unwrap()
}

/// Every canonical text form survives a format/parse round trip, except the
/// keyword ids whose output is normalized.
#[test]
fn canonical_round_trips() {
    for text in [
        "192.0.2.7",
        "2001:db8::1",
        "@gw.example",
        "user@example",
        "@#0xdeadbeef",
        "CN=Example, O=Acme",
    ] {
        let id = parse(text);
        let printed = id.to_string();
        let reparsed = Id::parse(&printed, false).unwrap();
        assert_eq!(reparsed, id, "round trip of {text} via {printed}");
    }
}

#[test]
fn normalized_keyword_outputs() {
    assert_eq!(parse("%fromcert").to_string(), "%fromcert");
    assert_eq!(parse("%none").to_string(), "(none)");
    assert_eq!(parse("%any").to_string(), "(none)");
    assert_eq!(parse("%null").to_string(), "ID_NULL");
    assert_eq!(parse("0.0.0.0").to_string(), "(none)");
}

#[test]
fn key_id_forms() {
    assert_eq!(
        parse("@#0xdeadbeef"),
        Id::KeyId(vec![0xde, 0xad, 0xbe, 0xef].into())
    );
    assert_eq!(parse("@[raw key]"), Id::KeyId(b"raw key"[..].into()));
    assert_eq!(parse("@[raw key]]"), Id::KeyId(b"raw key]"[..].into()));
    // textual key ids format as hex and still round trip by value
    let id = parse("@[raw key]").into_owned();
    let printed = id.to_string();
    let reparsed = Id::parse(&printed, false).unwrap();
    assert_eq!(reparsed, id);
}

#[test]
fn dn_order_sensitivity() {
    let a = parse("CN=Example,O=Acme");
    let b = parse("O=Acme,CN=Example");
    let (Id::DerAsn1Dn(da), Id::DerAsn1Dn(db)) = (&a, &b) else {
        panic!("expected DN identities");
    };
    assert!(!same_dn(da, db));
    assert!(same_dn_any_order(da, db));
    assert!(a.same_id(&b));
}

proptest! {
    /// Equality is reflexive for every identity we can parse.
    #[test]
    fn same_id_reflexive(text in "[a-z]{1,8}(\\.[a-z]{1,8}){0,2}") {
        for candidate in [
            format!("@{text}"),
            format!("user@{text}"),
            format!("CN={text}"),
        ] {
            let id = Id::parse(&candidate, false).unwrap();
            prop_assert!(id.same_id(&id));
            prop_assert_eq!(id.match_id(&id), Some(0));
        }
    }

    /// `None` matches everything, from both sides.
    #[test]
    fn wildcard_dominance(text in "[a-z]{1,8}") {
        for candidate in [
            format!("@{text}.example"),
            format!("{text}@example"),
            "192.0.2.1".to_string(),
            "%null".to_string(),
        ] {
            let id = Id::parse(&candidate, false).unwrap();
            prop_assert!(id.same_id(&Id::None));
            prop_assert!(Id::None.same_id(&id));
        }
    }

    /// FQDN and user-FQDN identities round trip through their text form.
    #[test]
    fn fqdn_round_trip(name in "[a-z][a-z0-9-]{0,12}(\\.[a-z][a-z0-9-]{0,12}){0,3}") {
        let fqdn = Id::parse(&format!("@{name}"), false).unwrap().into_owned();
        let printed = fqdn.to_string();
        prop_assert_eq!(Id::parse(&printed, false).unwrap(), fqdn);

        let user = format!("{name}@example");
        let user_id = Id::parse(&user, false).unwrap().into_owned();
        let user_printed = user_id.to_string();
        prop_assert_eq!(Id::parse(&user_printed, false).unwrap(), user_id);
    }

    /// Binary key ids of any content round trip through `@#0x<hex>`.
    #[test]
    fn key_id_round_trip(bytes in proptest::collection::vec(any::<u8>(), 1..24)) {
        let id = Id::KeyId(bytes.into());
        let printed = id.to_string();
        prop_assert_eq!(Id::parse(&printed, false).unwrap(), id);
    }
}

/// An unordered DN match holds for any permutation of RDNs.
#[test]
fn dn_unordered_matches_permutations() {
    let attrs = ["CN=gw", "O=Acme", "OU=Lab", "C=DE"];
    let base_text = attrs.join(",");
    let base = parse(&base_text);
    let Id::DerAsn1Dn(base_der) = &base else {
        panic!()
    };
    // a few representative permutations
    let permutations = [
        ["C=DE", "OU=Lab", "O=Acme", "CN=gw"],
        ["O=Acme", "CN=gw", "C=DE", "OU=Lab"],
        ["OU=Lab", "C=DE", "CN=gw", "O=Acme"],
    ];
    for perm in &permutations {
        let perm_text = perm.join(",");
        let other = parse(&perm_text);
        let Id::DerAsn1Dn(other_der) = &other else {
            panic!()
        };
        assert!(same_dn_any_order(base_der, other_der), "{perm:?}");
    }
}
