//! End-to-end validation scenarios through the public `validate` entry
//! point, using the built-in schema catalog and enum index.

use bv_validator::{
    BundleValidator, ErrorSource, FhirVersion, Severity, ValidationRequest,
};

fn validator() -> BundleValidator {
    BundleValidator::new().unwrap()
}

fn request(bundle_json: &str) -> ValidationRequest {
    ValidationRequest::new(bundle_json, FhirVersion::R4)
}

#[test]
fn test_invalid_patient_id() {
    let bundle = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {
                "resourceType": "Patient",
                "id": "invalid@id"
            }
        }]
    }"#;

    let response = validator().validate(&request(bundle));
    assert_eq!(response.errors.len(), 1);
    let error = &response.errors[0];
    assert_eq!(error.error_code, "FHIR_INVALID_ID_FORMAT");
    assert_eq!(error.json_pointer.as_deref(), Some("/entry/0/resource/id"));
    assert_eq!(error.severity, Severity::Error);
    assert_eq!(error.source, ErrorSource::Structure);
}

#[test]
fn test_reference_grammar_and_combination() {
    let bundle = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {
                "resourceType": "Observation",
                "status": "final",
                "code": {"text": "bp"},
                "subject": {
                    "reference": "invalid",
                    "identifier": {"system": "s", "value": "v"}
                }
            }
        }]
    }"#;

    let response = validator().validate(&request(bundle));
    let mut codes: Vec<&str> = response
        .errors
        .iter()
        .map(|e| e.error_code.as_str())
        .collect();
    codes.sort_unstable();
    assert_eq!(
        codes,
        vec![
            "FHIR_INVALID_REFERENCE_FORMAT",
            "FHIR_REFERENCE_INVALID_COMBINATION"
        ]
    );
    for error in &response.errors {
        assert_eq!(
            error.json_pointer.as_deref(),
            Some("/entry/0/resource/subject")
        );
    }
}

#[test]
fn test_extension_value_x_exclusivity() {
    let bundle = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {
                "resourceType": "Patient",
                "id": "p1",
                "extension": [{
                    "url": "u",
                    "valueString": "a",
                    "valueBoolean": true
                }]
            }
        }]
    }"#;

    let response = validator().validate(&request(bundle));
    let codes: Vec<&str> = response
        .errors
        .iter()
        .map(|e| e.error_code.as_str())
        .collect();
    assert_eq!(codes, vec!["FHIR_MULTIPLE_VALUE_X"]);
}

#[test]
fn test_enum_error_for_required_binding() {
    let bundle = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {
                "resourceType": "Patient",
                "id": "p1",
                "gender": "invalid"
            }
        }]
    }"#;

    let response = validator().validate(&request(bundle));
    assert_eq!(response.errors.len(), 1);
    let error = &response.errors[0];
    assert_eq!(error.error_code, "INVALID_ENUM_VALUE");
    assert_eq!(error.severity, Severity::Error, "required binding stays error");
    assert_eq!(response.summary.error_count, 1);
}

#[test]
fn test_multi_resource_enum_errors_not_deduped() {
    let bundle = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [
            {"resource": {"resourceType": "Patient", "id": "a", "gender": "invalid"}},
            {"resource": {"resourceType": "Patient", "id": "b", "gender": "invalid"}}
        ]
    }"#;

    let response = validator().validate(&request(bundle));
    let pointers: Vec<&str> = response
        .errors
        .iter()
        .filter(|e| e.error_code == "INVALID_ENUM_VALUE")
        .filter_map(|e| e.json_pointer.as_deref())
        .collect();
    assert_eq!(
        pointers,
        vec!["/entry/0/resource/gender", "/entry/1/resource/gender"]
    );
}

#[test]
fn test_string_newline_markdown_contrast() {
    let with_newline = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {
                "resourceType": "Patient",
                "id": "p1",
                "name": [{"text": "one\ntwo"}]
            }
        }]
    }"#;

    let response = validator().validate(&request(with_newline));
    let codes: Vec<&str> = response
        .errors
        .iter()
        .map(|e| e.error_code.as_str())
        .collect();
    assert_eq!(codes, vec!["FHIR_INVALID_STRING_NEWLINE"]);

    let with_tab = with_newline.replace("\\n", "\\t");
    let response = validator().validate(&request(&with_tab));
    assert!(response.errors.is_empty());
}

#[test]
fn test_bundle_type_missing_is_required_field() {
    let bundle = r#"{
        "resourceType": "Bundle",
        "entry": []
    }"#;

    let response = validator().validate(&request(bundle));
    let codes: Vec<&str> = response
        .errors
        .iter()
        .map(|e| e.error_code.as_str())
        .collect();
    assert_eq!(codes, vec!["REQUIRED_FIELD_MISSING"]);
    assert_eq!(response.errors[0].path.as_deref(), Some("Bundle.type"));
    assert_eq!(response.errors[0].json_pointer.as_deref(), Some(""));
}

#[test]
fn test_r5_encounter_status_values() {
    // "triaged" exists in R4 but was dropped in R5.
    let bundle = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {
                "resourceType": "Encounter",
                "id": "e1",
                "status": "triaged"
            }
        }]
    }"#;

    let r4 = validator().validate(&ValidationRequest::new(bundle, FhirVersion::R4));
    assert!(r4.errors.is_empty());

    let r5 = validator().validate(&ValidationRequest::new(bundle, FhirVersion::R5));
    let codes: Vec<&str> = r5.errors.iter().map(|e| e.error_code.as_str()).collect();
    assert!(codes.contains(&"INVALID_ENUM_VALUE"));
    assert_eq!(r5.metadata.fhir_version, FhirVersion::R5);
}

#[test]
fn test_canonical_version_suffix() {
    let bundle = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {
                "resourceType": "QuestionnaireResponse",
                "id": "q1",
                "status": "completed",
                "questionnaire": "http://example.org/Questionnaire/intake|"
            }
        }]
    }"#;

    let response = validator().validate(&request(bundle));
    let codes: Vec<&str> = response
        .errors
        .iter()
        .map(|e| e.error_code.as_str())
        .collect();
    assert_eq!(codes, vec!["FHIR_INVALID_CANONICAL"]);

    let fixed = bundle.replace("intake|", "intake|2.0");
    let response = validator().validate(&request(&fixed));
    assert!(response.errors.is_empty());
}

#[test]
fn test_operation_outcome_projection() {
    let bundle = r#"{
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {"resourceType": "Patient", "id": "bad@id"}
        }]
    }"#;

    let response = validator().validate(&request(bundle));
    let outcome = response.to_operation_outcome();
    assert_eq!(outcome.resource_type, "OperationOutcome");
    assert_eq!(outcome.issue.len(), 1);
    assert_eq!(outcome.issue[0].severity, "error");
    assert_eq!(outcome.issue[0].code, "structure");
    assert_eq!(
        outcome.issue[0].diagnostics.as_deref(),
        Some("FHIR_INVALID_ID_FORMAT")
    );
}
