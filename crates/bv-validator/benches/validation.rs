use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use bv_validator::{BundleValidator, FhirVersion, ValidationRequest};
use serde_json::json;

fn create_bundle(entries: usize) -> String {
    let entry: Vec<serde_json::Value> = (0..entries)
        .map(|i| {
            json!({
                "resource": {
                    "resourceType": "Patient",
                    "id": format!("patient-{i}"),
                    "gender": "male",
                    "birthDate": "1990-06-15",
                    "name": [{"family": "Doe", "given": ["John"]}],
                    "telecom": [{"system": "phone", "value": "555-0100"}]
                }
            })
        })
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": entry
    })
    .to_string()
}

fn create_rules() -> String {
    json!({
        "version": "1",
        "fhir_version": "R4",
        "rules": [
            {
                "id": "gender-required",
                "type": "Required",
                "resource_type": "Patient",
                "field_path": "Patient.gender",
                "severity": "error",
                "error_code": "FIELD_REQUIRED"
            },
            {
                "id": "id-shape",
                "type": "Regex",
                "resource_type": "Patient",
                "field_path": "Patient.id",
                "severity": "error",
                "error_code": "PATTERN_MISMATCH",
                "params": {"pattern": "^patient-[0-9]+$"}
            }
        ]
    })
    .to_string()
}

fn bench_structural_only(c: &mut Criterion) {
    let validator = BundleValidator::new().expect("builtin catalogs");
    let mut group = c.benchmark_group("structural");
    for entries in [1usize, 10, 100] {
        let bundle = create_bundle(entries);
        group.bench_with_input(
            BenchmarkId::from_parameter(entries),
            &bundle,
            |b, bundle| {
                b.iter(|| {
                    let request = ValidationRequest::new(bundle.clone(), FhirVersion::R4);
                    black_box(validator.validate(&request))
                })
            },
        );
    }
    group.finish();
}

fn bench_with_rules(c: &mut Criterion) {
    let validator = BundleValidator::new().expect("builtin catalogs");
    let rules = create_rules();
    let bundle = create_bundle(50);
    c.bench_function("structural_plus_rules_50", |b| {
        b.iter(|| {
            let request = ValidationRequest::new(bundle.clone(), FhirVersion::R4)
                .with_rules(rules.clone());
            black_box(validator.validate(&request))
        })
    });
}

criterion_group!(benches, bench_structural_only, bench_with_rules);
criterion_main!(benches);
