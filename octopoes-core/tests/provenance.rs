mod support;

use octopoes_core::repositories::OriginFilter;
use octopoes_model::{OriginType, ScanProfile};
use support::{DnsFixture, TestEngine, valid_time};
use uuid::Uuid;

async fn observed(engine: &mut TestEngine, fixture: &DnsFixture) -> Uuid {
    engine
        .declare(&[fixture.network.clone(), fixture.hostname.clone()])
        .await;
    let task_id = Uuid::new_v4();
    let service = engine.service();
    service
        .save_observation(
            fixture.hostname.reference(),
            "kat_dns",
            task_id,
            &[fixture.address.clone(), fixture.record.clone()],
            valid_time(),
        )
        .await
        .expect("observation should be accepted");
    service.commit().await.expect("commit should succeed");
    engine.settle().await;
    task_id
}

#[tokio::test]
async fn observed_objects_get_profiles_and_origins() {
    let mut engine = TestEngine::without_bits();
    let fixture = DnsFixture::new();
    let task_id = observed(&mut engine, &fixture).await;

    assert!(engine.exists(&fixture.record.reference()).await);
    assert_eq!(
        engine.profile(&fixture.record.reference()).await,
        ScanProfile::empty(fixture.record.reference())
    );

    let origins = engine
        .service()
        .list_origins(&OriginFilter::new().task_id(task_id), valid_time())
        .await
        .expect("origins should list");
    assert_eq!(origins.len(), 1);
    assert_eq!(origins[0].origin_type, OriginType::Observation);
    assert_eq!(origins[0].result.len(), 2);
}

#[tokio::test]
async fn dropped_results_are_deleted_when_nothing_else_produces_them() {
    let mut engine = TestEngine::without_bits();
    let fixture = DnsFixture::new();
    observed(&mut engine, &fixture).await;

    let service = engine.service();
    service
        .save_observation(
            fixture.hostname.reference(),
            "kat_dns",
            Uuid::new_v4(),
            &[fixture.address.clone()],
            valid_time(),
        )
        .await
        .expect("observation should be accepted");
    service.commit().await.expect("commit should succeed");
    engine.settle().await;

    assert!(!engine.exists(&fixture.record.reference()).await);
    assert!(engine.exists(&fixture.address.reference()).await);
}

#[tokio::test]
async fn declared_objects_survive_losing_an_observation() {
    let mut engine = TestEngine::without_bits();
    let fixture = DnsFixture::new();
    observed(&mut engine, &fixture).await;
    engine.declare(&[fixture.record.clone()]).await;

    let service = engine.service();
    service
        .save_observation(
            fixture.hostname.reference(),
            "kat_dns",
            Uuid::new_v4(),
            &[],
            valid_time(),
        )
        .await
        .expect("empty observation should be accepted");
    service.commit().await.expect("commit should succeed");
    engine.settle().await;

    assert!(engine.exists(&fixture.record.reference()).await);
    assert!(!engine.exists(&fixture.address.reference()).await);
    let observations = engine
        .service()
        .list_origins(
            &OriginFilter::new().origin_type(OriginType::Observation),
            valid_time(),
        )
        .await
        .expect("origins should list");
    assert!(observations.is_empty(), "empty observations are pruned");
}

#[tokio::test]
async fn affirmations_alone_do_not_keep_objects_alive() {
    let mut engine = TestEngine::without_bits();
    let fixture = DnsFixture::new();
    observed(&mut engine, &fixture).await;

    let service = engine.service();
    service
        .save_affirmation(fixture.address.clone(), "ip-normalizer", valid_time())
        .await
        .expect("affirmation should be accepted");
    service.commit().await.expect("commit should succeed");
    engine.settle().await;

    let service = engine.service();
    service
        .save_observation(
            fixture.hostname.reference(),
            "kat_dns",
            Uuid::new_v4(),
            &[fixture.record.clone()],
            valid_time(),
        )
        .await
        .expect("observation should be accepted");
    service.commit().await.expect("commit should succeed");
    engine.settle().await;

    assert!(!engine.exists(&fixture.address.reference()).await);
    let affirmations = engine
        .service()
        .list_origins(
            &OriginFilter::new().origin_type(OriginType::Affirmation),
            valid_time(),
        )
        .await
        .expect("origins should list");
    assert!(affirmations.is_empty());
}

#[tokio::test]
async fn deleting_an_object_cascades_to_what_it_produced() {
    let mut engine = TestEngine::without_bits();
    let fixture = DnsFixture::new();
    observed(&mut engine, &fixture).await;

    let service = engine.service();
    service
        .delete_ooi(&fixture.hostname.reference(), valid_time())
        .await
        .expect("delete should be queued");
    service.commit().await.expect("commit should succeed");
    engine.settle().await;

    for reference in [
        fixture.hostname.reference(),
        fixture.address.reference(),
        fixture.record.reference(),
    ] {
        assert!(!engine.exists(&reference).await, "{reference} should be gone");
    }
    assert!(engine.exists(&fixture.network.reference()).await);

    let leftovers = engine
        .service()
        .list_origins(
            &OriginFilter::new().source(fixture.hostname.reference()),
            valid_time(),
        )
        .await
        .expect("origins should list");
    assert!(leftovers.is_empty());
    let profile = engine
        .service()
        .repositories()
        .scan_profiles
        .get(&fixture.hostname.reference(), valid_time())
        .await;
    assert!(profile.is_err_and(|err| err.is_not_found()));
}

#[tokio::test]
async fn repeated_observations_only_refresh_the_task() {
    let mut engine = TestEngine::without_bits();
    let fixture = DnsFixture::new();
    observed(&mut engine, &fixture).await;

    let rerun = Uuid::new_v4();
    let service = engine.service();
    service
        .save_observation(
            fixture.hostname.reference(),
            "kat_dns",
            rerun,
            &[fixture.record.clone(), fixture.address.clone()],
            valid_time(),
        )
        .await
        .expect("observation should be accepted");
    service.commit().await.expect("commit should succeed");
    assert!(engine.drain().is_empty(), "a task id bump is not a graph change");

    let origins = engine
        .service()
        .list_origins(&OriginFilter::new().task_id(rerun), valid_time())
        .await
        .expect("origins should list");
    assert_eq!(origins.len(), 1);
}
