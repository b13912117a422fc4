//! Reporting and output generation
//!
//! Global invariants enforced:
//! - Risk types always listed in the same order
//! - Suppliers rendered in the order the model returned them

use crate::assessment::{Assessment, AssessmentError};
use crate::model::Supplier;
use crate::risk::RiskType;

/// Render an assessment as text output
pub fn render_text(assessment: &Assessment) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{} ({}) / {} ({})\n",
        assessment.country.name,
        assessment.country.code,
        assessment.sector.name,
        assessment.sector.code
    ));
    output.push_str(&format!(
        "Model: {} {}\n\n",
        assessment.model.name, assessment.model.version
    ));

    output.push_str(&format!(
        "{:<16} {:<8} {:<8} {}\n",
        "RISK", "DIRECT", "INDIRECT", "TOTAL"
    ));
    for risk_type in RiskType::ALL {
        output.push_str(&format!(
            "{:<16} {:<8} {:<8} {}\n",
            risk_type.as_str(),
            format!("{:.2}", assessment.direct_risk.scores[risk_type]),
            format!("{:.2}", assessment.indirect_risk[risk_type]),
            format!("{:.2}", assessment.total_risk[risk_type]),
        ));
    }

    if let Some(ref loss) = assessment.direct_risk.expected_loss {
        output.push_str(&format!(
            "\nClimate expected loss: {:.2}/yr ({:.2}%), 30yr PV {:.2} ({:.2}%)\n",
            loss.total_annual_loss,
            loss.total_annual_loss_pct,
            loss.present_value_30yr,
            loss.present_value_30yr_pct
        ));
        for (hazard, h) in &loss.breakdown {
            output.push_str(&format!(
                "  {:<14} {:<12} {}\n",
                hazard,
                format!("{:.2}", h.annual_loss),
                h.confidence
            ));
        }
    }

    if !assessment.top_suppliers.is_empty() {
        output.push('\n');
        output.push_str(&render_suppliers_text(&assessment.top_suppliers));
    }

    output
}

/// Render a supplier list as text output
pub fn render_suppliers_text(suppliers: &[Supplier]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<10} {:<5} {:<24} {:<8} {}\n",
        "COEFF", "CODE", "COUNTRY", "SECTOR", "NAME"
    ));
    for s in suppliers {
        output.push_str(&format!(
            "{:<10} {:<5} {:<24} {:<8} {}\n",
            format!("{:.4}", s.coefficient),
            s.country,
            truncate_or_pad(&s.country_name, 24),
            s.sector,
            s.sector_name
        ));
    }
    output
}

/// Render an assessment as JSON output
pub fn render_json(assessment: &Assessment) -> String {
    serde_json::to_string_pretty(assessment).unwrap_or_else(|_| "{}".to_string())
}

/// Render a structured assessment error as JSON output
pub fn render_error_json(error: &AssessmentError) -> String {
    serde_json::to_string_pretty(&error.to_json()).unwrap_or_else(|_| "{}".to_string())
}

fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        format!("{:<width$}", s, width = width)
    }
}
