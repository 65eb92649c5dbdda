use std::sync::Arc;

use backend_kernel::{
    portal::{
        external::testing::{NullArenaFactory, NullHoldPersister, NullResourceOwner, NullResourceOwnerFactory, VecTupleStoreFactory},
        types::StatementList,
        CursorOptions, PortalRegistry, PortalStatus, SubTransactionId,
    },
    KernelConfig, SystemClock,
};

fn registry() -> PortalRegistry {
    PortalRegistry::new(
        Box::new(NullArenaFactory),
        Box::new(NullResourceOwnerFactory),
        Arc::new(SystemClock),
        KernelConfig::default(),
        Box::new(VecTupleStoreFactory),
        Box::new(NullHoldPersister),
    )
}

/// Carries a freshly created portal from NEW to READY the way a real
/// executor would: define its query text, then mark it ready.
fn define_and_ready(reg: &PortalRegistry, name: &str, source_text: &str) {
    reg.define_query(name, None, source_text, None, None, StatementList::default(), None)
        .unwrap();
    reg.mark_ready(name).unwrap();
}

#[test]
fn holdable_cursor_survives_commit_of_its_creating_subtransaction() {
    // End-to-end scenario: a `WITH HOLD` cursor opened and left READY in a
    // sub-transaction that has already been folded into its parent
    // (create_sub_id marked invalid) survives the top-level commit.
    let reg = registry();
    let name = reg
        .create(Some("held".into()), CursorOptions::HOLD | CursorOptions::SCROLL, SubTransactionId::INVALID)
        .unwrap();
    define_and_ready(&reg, &name, "select * from t");

    reg.pre_commit(false).unwrap();

    assert_eq!(reg.status(&name).unwrap(), PortalStatus::Ready);
}

#[test]
fn holdable_cursor_created_in_live_subtransaction_is_materialized_not_dropped() {
    let reg = registry();
    let sub = SubTransactionId::new(7);
    let name = reg.create(Some("held2".into()), CursorOptions::HOLD, sub).unwrap();
    define_and_ready(&reg, &name, "select * from t");

    reg.pre_commit(false).unwrap();

    // Still present (materialized), not dropped as a bare top-commit would do.
    assert_eq!(reg.status(&name).unwrap(), PortalStatus::Ready);
}

#[test]
fn holdable_cursor_blocks_prepared_transaction_commit() {
    let reg = registry();
    let sub = SubTransactionId::new(7);
    let name = reg.create(Some("held3".into()), CursorOptions::HOLD, sub).unwrap();
    define_and_ready(&reg, &name, "select * from t");

    let err = reg.pre_commit(true).unwrap_err();
    assert!(matches!(err, backend_kernel::Error::FeatureNotSupported(_)));

    // Left untouched: PREPARE TRANSACTION failing doesn't tear anything down.
    assert_eq!(reg.status(&name).unwrap(), PortalStatus::Ready);
}

#[test]
fn pinned_portal_blocks_drop_and_unpinning_unblocks_it() {
    let reg = registry();
    let name = reg.create(Some("p".into()), CursorOptions::NONE, SubTransactionId::new(1)).unwrap();
    reg.pin(&name).unwrap();

    let err = reg.drop(&name, false).unwrap_err();
    assert!(matches!(err, backend_kernel::Error::InvalidCursorState(_)));

    reg.unpin(&name).unwrap();
    reg.drop(&name, false).unwrap();
    assert!(reg.status(&name).is_err());
}

#[test]
fn pinned_portal_blocks_commit_and_unpinning_unblocks_it() {
    let reg = registry();
    let name = reg.create(Some("c".into()), CursorOptions::NONE, SubTransactionId::new(1)).unwrap();
    reg.pin(&name).unwrap();

    assert!(reg.pre_commit(false).is_err());

    reg.unpin(&name).unwrap();
    reg.pre_commit(false).unwrap();
    assert!(reg.status(&name).is_err());
}

#[test]
fn sub_transaction_abort_fails_active_portal_created_there_and_tears_it_down() {
    let reg = registry();
    let sub = SubTransactionId::new(3);
    let name = reg.create(Some("c".into()), CursorOptions::NONE, sub).unwrap();
    define_and_ready(&reg, &name, "select 1");
    reg.mark_active(&name, sub).unwrap();

    reg.at_sub_abort(sub, SubTransactionId::new(1));
    assert_eq!(reg.status(&name).unwrap(), PortalStatus::Failed);

    reg.at_sub_cleanup(sub);
    assert!(reg.status(&name).is_err());
}

#[test]
fn sub_transaction_abort_reparents_portal_used_but_not_created_there() {
    let reg = registry();
    let name = reg.create(Some("c".into()), CursorOptions::NONE, SubTransactionId::INVALID).unwrap();
    define_and_ready(&reg, &name, "select 1");
    let sub = SubTransactionId::new(5);
    reg.mark_active(&name, sub).unwrap();

    reg.at_sub_abort(sub, SubTransactionId::new(1));

    assert_eq!(reg.status(&name).unwrap(), PortalStatus::Failed);
    assert_eq!(reg.active_sub_id(&name).unwrap(), SubTransactionId::new(1));
}

#[test]
fn sub_transaction_abort_releases_reparented_owner_of_a_now_failed_portal() {
    let reg = registry();
    let name = reg.create(Some("c".into()), CursorOptions::NONE, SubTransactionId::INVALID).unwrap();
    define_and_ready(&reg, &name, "select 1");
    let sub = SubTransactionId::new(5);
    reg.mark_active(&name, sub).unwrap();

    let owner = Box::new(NullResourceOwner::default());
    reg.with_portal_mut(&name, |portal| {
        portal.attach_resource_owner(owner);
        Ok(())
    })
    .unwrap();

    reg.at_sub_abort(sub, SubTransactionId::new(1));

    assert_eq!(reg.status(&name).unwrap(), PortalStatus::Failed);
    // Released in place since this crate models no owner hierarchy to
    // reparent it into.
    reg.with_portal_mut(&name, |portal| {
        assert!(!portal.has_resource_owner());
        Ok(())
    })
    .unwrap();
}

#[test]
fn precommit_clears_resource_owner_of_active_portal() {
    let reg = registry();
    let name = reg.create(Some("c".into()), CursorOptions::NONE, SubTransactionId::INVALID).unwrap();
    define_and_ready(&reg, &name, "select 1");
    reg.mark_active(&name, SubTransactionId::new(9)).unwrap();

    reg.with_portal_mut(&name, |portal| {
        portal.attach_resource_owner(Box::new(NullResourceOwner::default()));
        Ok(())
    })
    .unwrap();

    reg.pre_commit(false).unwrap();

    assert_eq!(reg.status(&name).unwrap(), PortalStatus::Active);
    reg.with_portal_mut(&name, |portal| {
        assert!(!portal.has_resource_owner());
        Ok(())
    })
    .unwrap();
}

#[test]
fn resource_owner_release_runs_all_three_phases_on_drop() {
    let reg = registry();
    let name = reg.create(Some("c".into()), CursorOptions::NONE, SubTransactionId::new(1)).unwrap();

    reg.with_portal_mut(&name, |portal| {
        portal.attach_resource_owner(Box::new(NullResourceOwner::default()));
        Ok(())
    })
    .unwrap();

    reg.drop(&name, false).unwrap();
    assert!(reg.status(&name).is_err());
}

#[test]
fn drop_all_tears_down_every_portal_regardless_of_pin_state() {
    let reg = registry();
    let a = reg.create(Some("a".into()), CursorOptions::NONE, SubTransactionId::new(1)).unwrap();
    let b = reg.create(Some("b".into()), CursorOptions::NONE, SubTransactionId::new(1)).unwrap();
    reg.pin(&a).unwrap();

    reg.drop_all();

    assert!(reg.status(&a).is_err());
    assert!(reg.status(&b).is_err());
    assert!(reg.is_empty());
}
