use super::*;
use crate::error::Result;

#[test]
fn test_priority_round_trip() -> Result<()> {
    let mut m = Message::new();
    let p = PriorityAttr(1862270975);
    m.build(&[Box::new(BINDING_REQUEST), Box::new(p)])?;

    let mut m1 = Message::new();
    m1.write(&m.raw)?;

    let mut p1 = PriorityAttr::default();
    p1.get_from(&m1)?;
    assert_eq!(p1, p);

    Ok(())
}

#[test]
fn test_priority_absent() -> Result<()> {
    let m = Message::new();
    let mut p = PriorityAttr::default();
    let result = p.get_from(&m);
    if let Err(err) = result {
        assert_eq!(err, stun::Error::ErrAttributeNotFound);
    } else {
        panic!("expected error, but got ok");
    }
    Ok(())
}

#[test]
fn test_controlling_round_trip() -> Result<()> {
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(AttrControlling(4321))])?;

    let mut m1 = Message::new();
    m1.write(&m.raw)?;

    assert!(m1.contains(ATTR_ICE_CONTROLLING));
    assert!(!m1.contains(ATTR_ICE_CONTROLLED));

    let mut c = AttrControlling::default();
    c.get_from(&m1)?;
    assert_eq!(c.0, 4321);

    Ok(())
}

#[test]
fn test_controlled_round_trip() -> Result<()> {
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(AttrControlled(66))])?;

    let mut c = AttrControlled::default();
    c.get_from(&m)?;
    assert_eq!(c.0, 66);

    Ok(())
}

#[test]
fn test_use_candidate() -> Result<()> {
    let mut with = Message::new();
    with.build(&[Box::new(BINDING_REQUEST), Box::new(UseCandidateAttr::new())])?;
    assert!(UseCandidateAttr::is_set(&with));

    let mut without = Message::new();
    without.build(&[Box::new(BINDING_REQUEST)])?;
    assert!(!UseCandidateAttr::is_set(&without));

    Ok(())
}

#[test]
fn test_role_parse() -> Result<()> {
    assert_eq!(Role::try_from("controlling")?, Role::Controlling);
    assert_eq!(Role::try_from("controlled")?, Role::Controlled);
    assert!(Role::try_from("neither").is_err());
    Ok(())
}
