mod support;

use std::{collections::BTreeMap, collections::BTreeSet};

use octopoes_config::BitSettings;
use octopoes_core::{
    bits::{Bit, BitConfig, BitDefinition, BitError, BitRegistry},
    repositories::OriginFilter,
};
use octopoes_model::{
    Config, FindingType, IpPort, ObjectType, Ooi, Origin, OriginType, PortState,
    Protocol,
};
use support::{DnsFixture, TestEngine, valid_time};

fn settings(enabled: &[&str], disabled: &[&str]) -> BitSettings {
    BitSettings {
        enabled: enabled.iter().map(|id| id.to_string()).collect(),
        disabled: disabled.iter().map(|id| id.to_string()).collect(),
    }
}

async fn finding_types(engine: &TestEngine) -> BTreeSet<String> {
    engine
        .service()
        .list_ooi(&[ObjectType::Finding], valid_time(), 100, 0)
        .await
        .expect("findings should list")
        .items
        .into_iter()
        .filter_map(|profiled| match profiled.ooi {
            Ooi::Finding(finding) => Some(finding.finding_type.natural_key().to_string()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn address_records_resolve_their_hostname() {
    let mut engine = TestEngine::new();
    let fixture = DnsFixture::new();
    engine.declare(&fixture.all()).await;

    assert!(engine.exists(&fixture.resolved_hostname()).await);
    let origin = Origin::inference("dns-resolving", fixture.hostname.reference());
    let parameters = engine
        .service()
        .repositories()
        .origin_parameters
        .list_by_origin(&BTreeSet::from([origin.id()]), valid_time())
        .await
        .expect("parameters should list");
    assert_eq!(parameters.len(), 1);
    assert_eq!(parameters[0].reference, fixture.record.reference());
}

#[tokio::test]
async fn removing_the_record_retracts_the_resolution() {
    let mut engine = TestEngine::new();
    let fixture = DnsFixture::new();
    engine.declare(&fixture.all()).await;

    let service = engine.service();
    service
        .delete_ooi(&fixture.record.reference(), valid_time())
        .await
        .expect("delete should be queued");
    service.commit().await.expect("commit should succeed");
    engine.settle().await;

    assert!(!engine.exists(&fixture.resolved_hostname()).await);
    let origin = engine
        .service()
        .repositories()
        .origins
        .get(
            &Origin::inference("dns-resolving", fixture.hostname.reference()).id(),
            valid_time(),
        )
        .await
        .expect("inference origins outlive their results");
    assert!(origin.result.is_empty());
}

#[tokio::test]
async fn disabled_bits_are_not_attached() {
    let mut engine =
        TestEngine::new().with_bit_settings(settings(&[], &["dns-resolving"]));
    let fixture = DnsFixture::new();
    engine.declare(&fixture.all()).await;

    assert!(!engine.exists(&fixture.resolved_hostname()).await);
    let inferences = engine
        .service()
        .list_origins(
            &OriginFilter::new().origin_type(OriginType::Inference),
            valid_time(),
        )
        .await
        .expect("origins should list");
    assert!(inferences.is_empty());
}

#[tokio::test]
async fn scan_level_gates_bits_with_a_minimum() {
    let mut engine =
        TestEngine::new().with_bit_settings(settings(&["missing-dns-zone"], &[]));
    let fixture = DnsFixture::new();
    engine.declare(&fixture.all()).await;
    assert!(finding_types(&engine).await.is_empty());

    engine.set_declared_level(&fixture.hostname.reference(), 1).await;
    assert_eq!(
        finding_types(&engine).await,
        BTreeSet::from(["KAT-NO-DNS-ZONE".to_string()])
    );

    engine.set_declared_level(&fixture.hostname.reference(), 0).await;
    assert!(finding_types(&engine).await.is_empty());
    let finding_type = Ooi::from(FindingType {
        id: "KAT-NO-DNS-ZONE".into(),
        description: None,
    });
    assert!(!engine.exists(&finding_type.reference()).await);
}

#[tokio::test]
async fn config_objects_rerun_the_bit_they_configure() {
    let mut engine = TestEngine::new();
    let fixture = DnsFixture::new();
    let port = Ooi::from(IpPort {
        address: fixture.address.reference(),
        protocol: Protocol::Tcp,
        port: 3306,
        state: Some(PortState::Open),
    });
    engine
        .declare(&[fixture.network.clone(), fixture.address.clone(), port])
        .await;
    assert_eq!(
        finding_types(&engine).await,
        BTreeSet::from(["KAT-OPEN-DATABASE-PORT".to_string()])
    );

    let config = Ooi::from(Config {
        ooi: fixture.network.reference(),
        bit_id: "port-classification-ip".into(),
        config: BTreeMap::from([("db_tcp_ports".to_string(), "5432".to_string())]),
    });
    engine.declare(&[config]).await;

    assert_eq!(
        finding_types(&engine).await,
        BTreeSet::from(["KAT-UNCOMMON-OPEN-PORT".to_string()])
    );
}

struct BrokenBit {
    definition: BitDefinition,
}

impl Bit for BrokenBit {
    fn definition(&self) -> &BitDefinition {
        &self.definition
    }

    fn run(
        &self,
        _source: &Ooi,
        _parameters: &[Ooi],
        _config: &BitConfig,
    ) -> Result<Vec<Ooi>, BitError> {
        Err(BitError("resolver exploded".into()))
    }
}

#[tokio::test]
async fn failing_bits_leave_their_origin_untouched() {
    let mut bits = BitRegistry::empty();
    bits.register(BrokenBit {
        definition: BitDefinition::new("broken", ObjectType::Network),
    });
    let mut engine = TestEngine::with_bits(bits);
    let fixture = DnsFixture::new();
    engine.declare(&[fixture.network.clone()]).await;

    let origin = engine
        .service()
        .repositories()
        .origins
        .get(
            &Origin::inference("broken", fixture.network.reference()).id(),
            valid_time(),
        )
        .await
        .expect("the origin is attached even though the bit fails");
    assert!(origin.result.is_empty());
    assert!(engine.exists(&fixture.network.reference()).await);
}

#[tokio::test]
async fn recalculating_bits_attaches_newly_enabled_bits() {
    let mut engine =
        TestEngine::new().with_bit_settings(settings(&[], &["dns-resolving"]));
    let fixture = DnsFixture::new();
    engine.declare(&fixture.all()).await;
    assert!(!engine.exists(&fixture.resolved_hostname()).await);

    engine.factory = engine.factory.clone().with_bit_settings(BitSettings::default());
    let service = engine.service();
    let executions = service
        .recalculate_bits(valid_time())
        .await
        .expect("recalculation should succeed");
    assert_eq!(executions, 0, "new origins run once they are committed");
    service.commit().await.expect("commit should succeed");
    engine.settle().await;
    assert!(engine.exists(&fixture.resolved_hostname()).await);

    let service = engine.service();
    let executions = service
        .recalculate_bits(valid_time())
        .await
        .expect("recalculation should succeed");
    service.commit().await.expect("commit should succeed");
    assert_eq!(executions, 1);
    assert!(engine.drain().is_empty(), "nothing changed the second time");
}
