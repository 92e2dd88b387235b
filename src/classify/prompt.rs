use std::collections::BTreeMap;

use super::types::ClassificationRequest;

/// Named ranges whose names occur in the formula, matched case-insensitively
pub fn referenced_ranges(formula_text: &str, named_ranges: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let formula = formula_text.to_lowercase();
    named_ranges
        .iter()
        .filter(|(name, _)| !name.is_empty() && formula.contains(&name.to_lowercase()))
        .map(|(name, description)| (name.clone(), description.clone()))
        .collect()
}

/// Build the user prompt for one classification request
pub fn build_prompt(request: &ClassificationRequest) -> String {
    let mut parts = Vec::new();

    parts.push(request.instruction_text.clone());

    parts.push(format!(
        "Accounting Policy Context:\n- Sheet: {}\n- Row: {}\n- GUID: {}",
        request.sheet, request.row, request.identifier
    ));

    if !request.reference_glossary.is_empty() {
        let glossary = request
            .reference_glossary
            .iter()
            .map(|(name, description)| format!("- {}: {}", name, description))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("Named Ranges Reference (for formula interpretation):\n{}", glossary));
    }

    parts.push(format!("Formula Text to Classify:\n{}", request.formula_text));

    if !request.cell_value.trim().is_empty() {
        parts.push(format!("Current Cell Value: {}", request.cell_value));
    }

    parts.push(
        "Please respond with only the classification in the exact format specified in the instruction above."
            .to_string(),
    );

    parts.join("\n\n")
}
