use std::io::Write;
use std::sync::Arc;

use shnn_kernel::*;

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn loads_and_runs_configured_simulation() {
    let file = write_config(
        r#"[simulation]
time_driven_step = 0.001
sampling_period = 0.01

[integration]
method = "rk45ad"
e_min = 1e-6
e_max = 1e-4
h_min = 1e-6
h_max = 1e-3

[[learning_rules]]
type = "stdp-ls"
"#,
    );
    let config = KernelConfig::from_path(file.path()).unwrap();
    assert_eq!(config.integration.method, MethodKind::Rk45Adaptive);

    let network = NetworkBuilder::new()
        .add_neurons(2)
        .with_rules(config.build_rules().unwrap())
        .connect(
            ConnectionSpec::new(NeuronId::new(0), NeuronId::new(1), 0.5, 1e-3)
                .with_rule(RuleId(0)),
        )
        .build(Arc::new(LifConductanceModel::default()), 2)
        .unwrap();
    assert_eq!(network.rule(RuleId(0)).unwrap().name(), "stdp-ls");

    let mut sim = Simulation::new(network, config.simulation, config.integration).unwrap();
    sim.inject_spike(NeuronId::new(0), 0.001).unwrap();
    let report = sim.run_until(0.05).unwrap();
    assert_eq!(report.status, SimulationStatus::Stopped);
    assert!(report.stats.accepted > 0);
}

#[test]
fn inconsistent_bounds_report_file_and_line() {
    let file = write_config(
        r#"[integration]
method = "bdf1-adaptive"
e_min = 1e-6
e_max = 1e-4
h_min = 1e-2
h_max = 1e-3
"#,
    );
    let err = KernelConfig::from_path(file.path()).unwrap_err();
    assert_eq!(err.line(), Some(5));
    let message = err.to_string();
    assert!(message.starts_with(&format!("{}:5:", file.path().display())), "{}", message);

    let file = write_config(
        r#"[integration]
method = "bdf1-adaptive"
e_min = 1e-2
e_max = 1e-4
h_min = 1e-6
h_max = 1e-3
"#,
    );
    let err = KernelConfig::from_path(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { line: 3, .. }), "{}", err);

    // Surfaces through the kernel error as well
    let kernel: KernelError = err.into();
    assert!(kernel.to_string().contains("e_min"));
}

#[test]
fn unknown_fields_are_parse_errors() {
    let file = write_config("[simulation]\ntime_driven_step = 0.001\nsampling_perod = 0.1\n");
    let err = KernelConfig::from_path(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "{}", err);
    assert!(err.to_string().contains("sampling_perod"), "{}", err);

    let file = write_config("[[learning_rules]]\ntype = \"hebbian\"\n");
    let err = KernelConfig::from_path(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "{}", err);
}

#[test]
fn non_finite_bounds_are_rejected() {
    let file = write_config(
        r#"[integration]
method = "rk45-adaptive"
e_min = 1e-6
e_max = 1e-4
h_min = 1e-6
h_max = nan
"#,
    );
    let err = KernelConfig::from_path(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { line: 6, .. }), "{}", err);
}
