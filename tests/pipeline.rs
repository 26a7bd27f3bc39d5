use std::{path::Path, sync::mpsc, time::Duration};

use spinn_dse::{
    chip::virtual_board::{BoardOp, OpKind},
    data_spec::DataSpecProgram,
    graph::{
        BoxError, DataSpecGenerator, Graph, Placement, RoutingInfo, SpecContext, TagAssignments,
        Vertex,
    },
    loader::{
        binary::{BinaryImage, ExecutableFinder},
        coordinator::ExecutionCoordinator,
        pipeline::{run_sender, PipelinedTransmitter, SpecCommand, SpecJob},
        resources::ResourceDescriptor,
        transmit::SpecInputs,
    },
    CoreLocation, LoadError, PlatformConfig, TransportError, VirtualBoard,
};

#[ctor::ctor]
fn test_init() {
    tracing_subscriber::util::SubscriberInitExt::init(
        tracing_subscriber::layer::SubscriberExt::with(
            tracing_subscriber::layer::SubscriberExt::with(
                tracing_subscriber::registry(),
                tracing_subscriber::fmt::layer(),
            ),
            tracing_subscriber::filter::EnvFilter::from_default_env(),
        ),
    );
}

struct FixedSpec(Vec<u8>);

impl DataSpecGenerator for FixedSpec {
    fn generate_data_spec(&self, _context: &SpecContext<'_>) -> Result<Vec<u8>, BoxError> {
        Ok(self.0.clone())
    }
}

struct BrokenSpec;

impl DataSpecGenerator for BrokenSpec {
    fn generate_data_spec(&self, _context: &SpecContext<'_>) -> Result<Vec<u8>, BoxError> {
        Err("broken".into())
    }
}

fn interpreter() -> BinaryImage {
    BinaryImage::from_bytes("data_specification_executor.aplx", vec![0xD5; 128])
}

fn job(core: CoreLocation, len: usize) -> SpecCommand {
    SpecCommand::Send(SpecJob {
        core,
        program: DataSpecProgram::new(vec![0xEE; len]),
        target_app_id: 30,
    })
}

fn finder_with(dir: &Path, names: &[&str]) -> ExecutableFinder {
    for name in names {
        std::fs::write(dir.join(name), [0u8; 64]).unwrap();
    }
    ExecutableFinder::with_paths([dir])
}

#[test]
fn sender_writes_then_starts_each_core() {
    let config = PlatformConfig::default();
    let a = CoreLocation::new(0, 0, 1);
    let b = CoreLocation::new(1, 0, 1);

    let (tx, rx) = mpsc::sync_channel(4);
    tx.send(job(a, 20)).unwrap();
    tx.send(job(b, 40)).unwrap();
    tx.send(SpecCommand::Stop).unwrap();

    let mut board = VirtualBoard::new();
    let summary = run_sender(&mut board, rx, &interpreter(), &config).unwrap();

    assert_eq!(summary.floods, 2);
    assert_eq!(summary.handles.len(), 2);
    assert_eq!(summary.handles[&b].length, 40);

    // malloc, malloc, header, body, user 0, flood per core
    let kinds: Vec<OpKind> = board.ops().iter().map(|op| op.kind()).collect();
    let per_core = [
        OpKind::Malloc,
        OpKind::Malloc,
        OpKind::Write,
        OpKind::Write,
        OpKind::Write,
        OpKind::Flood,
    ];
    assert_eq!(&kinds[..6], &per_core);
    assert_eq!(&kinds[6..], &per_core);

    match &board.ops()[5] {
        BoardOp::Flood { cores, app_id, image } => {
            assert_eq!(cores, &vec![a]);
            assert_eq!(*app_id, 31);
            assert_eq!(image.as_slice(), interpreter().bytes());
        }
        other => panic!("expected flood, got {other:?}"),
    }
    assert_eq!(board.header_for(b).unwrap().program_length, 40);
}

#[test]
fn stop_drains_earlier_sends_and_nothing_after() {
    let config = PlatformConfig::default();
    let (tx, rx) = mpsc::sync_channel(8);
    for p in 1..=3 {
        tx.send(job(CoreLocation::new(0, 0, p), 8)).unwrap();
    }
    tx.send(SpecCommand::Stop).unwrap();
    tx.send(job(CoreLocation::new(0, 0, 9), 8)).unwrap();

    let mut board = VirtualBoard::new();
    let summary = run_sender(&mut board, rx, &interpreter(), &config).unwrap();

    assert_eq!(summary.handles.len(), 3);
    assert_eq!(board.count(OpKind::Flood), 3);
    assert!(board.header_for(CoreLocation::new(0, 0, 9)).is_none());
}

#[test]
fn sender_without_stop_reports_disconnect() {
    let (tx, rx) = mpsc::sync_channel(2);
    tx.send(job(CoreLocation::new(0, 0, 1), 4)).unwrap();
    drop(tx);

    let mut board = VirtualBoard::new();
    assert!(matches!(
        run_sender(&mut board, rx, &interpreter(), &PlatformConfig::default()),
        Err(LoadError::SenderDisconnected)
    ));
    assert_eq!(board.count(OpKind::Flood), 1);
}

#[test]
fn pipelined_batch_then_barrier() {
    let dir = tempfile::tempdir().unwrap();
    let finder = finder_with(dir.path(), &["v.aplx"]);
    let config = PlatformConfig::default()
        .pipeline_depth(1)
        .poll_interval(Duration::from_millis(1))
        .completion_timeout(Duration::from_secs(5));

    let mut graph = Graph::new();
    let with_spec = graph.add_vertex(
        Vertex::new("with", ResourceDescriptor::new(1))
            .with_binary("v.aplx")
            .with_data_spec(FixedSpec(vec![1; 32])),
    );
    let without = graph.add_vertex(Vertex::new("without", ResourceDescriptor::new(1)));
    let placements: Vec<Placement> = (1..=4)
        .map(|p| Placement::new(0, 0, p, with_spec))
        .chain([Placement::new(0, 0, 5, without)])
        .collect();
    let routing_info = RoutingInfo::new();
    let tags = TagAssignments::new();
    let inputs = SpecInputs {
        graph: &graph,
        placements: &placements,
        routing_info: &routing_info,
        tags: &tags,
    };

    let image = interpreter();
    let mut board = VirtualBoard::new();
    let result = PipelinedTransmitter::new(&config, &finder, &image)
        .unwrap()
        .transmit(&mut board, &inputs)
        .unwrap();

    assert_eq!(result.dsg_targets.len(), 4);
    assert_eq!(result.report.skipped(), vec![CoreLocation::new(0, 0, 5)]);
    assert_eq!(result.executable_targets.total_processors(), 4);
    assert_eq!(board.count(OpKind::Flood), 4);

    let participants = (1..=4).map(|p| CoreLocation::new(0, 0, p)).collect();
    let mut coordinator = ExecutionCoordinator::from_config(&config, participants).unwrap();
    coordinator.mark_running().unwrap();
    let token = coordinator.await_completion(&mut board).unwrap();
    assert_eq!(token.finished, 4);
}

#[test]
fn pipelined_generator_failure_keeps_sent_programs() {
    let dir = tempfile::tempdir().unwrap();
    let finder = finder_with(dir.path(), &["v.aplx"]);
    let config = PlatformConfig::default();

    let mut graph = Graph::new();
    let good = graph.add_vertex(
        Vertex::new("good", ResourceDescriptor::new(1))
            .with_binary("v.aplx")
            .with_data_spec(FixedSpec(vec![2; 16])),
    );
    let broken = graph.add_vertex(
        Vertex::new("broken", ResourceDescriptor::new(1))
            .with_binary("v.aplx")
            .with_data_spec(BrokenSpec),
    );
    let placements = [
        Placement::new(0, 0, 1, good),
        Placement::new(0, 0, 2, broken),
        Placement::new(0, 0, 3, good),
    ];
    let routing_info = RoutingInfo::new();
    let tags = TagAssignments::new();
    let inputs = SpecInputs {
        graph: &graph,
        placements: &placements,
        routing_info: &routing_info,
        tags: &tags,
    };

    let image = interpreter();
    let mut board = VirtualBoard::new();
    let transmitter = PipelinedTransmitter::new(&config, &finder, &image).unwrap();

    match transmitter.transmit(&mut board, &inputs) {
        Err(LoadError::SpecGeneration { core, report, .. }) => {
            assert_eq!(core, CoreLocation::new(0, 0, 2));
            assert_eq!(report.succeeded(), vec![CoreLocation::new(0, 0, 1)]);
            assert_eq!(report.not_attempted(), vec![CoreLocation::new(0, 0, 3)]);
        }
        other => panic!("expected SpecGeneration, got {other:?}"),
    }
    assert_eq!(board.count(OpKind::Flood), 1);
}

#[test]
fn sender_transport_failure_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let finder = finder_with(dir.path(), &["v.aplx"]);
    let config = PlatformConfig::default().pipeline_depth(1);

    let mut graph = Graph::new();
    let v = graph.add_vertex(
        Vertex::new("v", ResourceDescriptor::new(1))
            .with_binary("v.aplx")
            .with_data_spec(FixedSpec(vec![2; 16])),
    );
    let placements: Vec<Placement> = (1..=6).map(|p| Placement::new(0, 0, p, v)).collect();
    let routing_info = RoutingInfo::new();
    let tags = TagAssignments::new();
    let inputs = SpecInputs {
        graph: &graph,
        placements: &placements,
        routing_info: &routing_info,
        tags: &tags,
    };

    let image = interpreter();
    let mut board = VirtualBoard::new();
    board.fail_after(OpKind::Write, 4);

    let result = PipelinedTransmitter::new(&config, &finder, &image)
        .unwrap()
        .transmit(&mut board, &inputs);
    assert!(matches!(
        result,
        Err(LoadError::Transport(TransportError::WriteFailed { .. }))
    ));
    // First core completed, second failed on its body write
    assert_eq!(board.count(OpKind::Flood), 1);
}

#[test]
fn pipelined_rejects_same_core_twice() {
    let dir = tempfile::tempdir().unwrap();
    let finder = finder_with(dir.path(), &["v.aplx"]);
    let config = PlatformConfig::default();

    let mut graph = Graph::new();
    let v = graph.add_vertex(
        Vertex::new("v", ResourceDescriptor::new(1))
            .with_binary("v.aplx")
            .with_data_spec(FixedSpec(vec![2; 16])),
    );
    let placements = [Placement::new(0, 0, 1, v), Placement::new(0, 0, 1, v)];
    let routing_info = RoutingInfo::new();
    let tags = TagAssignments::new();
    let inputs = SpecInputs {
        graph: &graph,
        placements: &placements,
        routing_info: &routing_info,
        tags: &tags,
    };

    let image = interpreter();
    let mut board = VirtualBoard::new();
    let result = PipelinedTransmitter::new(&config, &finder, &image)
        .unwrap()
        .transmit(&mut board, &inputs);
    assert!(matches!(
        result,
        Err(LoadError::DuplicatePlacement(core)) if core == CoreLocation::new(0, 0, 1)
    ));
    assert!(board.ops().is_empty());
}

#[test]
fn oversized_interpreter_is_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let finder = finder_with(dir.path(), &[]);
    let config = PlatformConfig::default().binary_limits(64, 100);
    let image = interpreter();

    assert!(matches!(
        PipelinedTransmitter::new(&config, &finder, &image),
        Err(LoadError::BinaryTooLarge { size: 128, .. })
    ));
}
