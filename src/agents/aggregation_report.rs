use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::payload::{
    self, Analysis, BudgetAnalysis, ComparisonRow, DeliveryAnalysis, Offer, PayloadUpdates,
    PriceAnalysis, QualityAnalysis, Report, Rfq, keys,
};
use super::{AgentWorker, SourcingBackend, StageOutput, names};
use crate::error::StageError;
use crate::job::{JobEnvelope, now_timestamp};

const HIGH_QUALITY: f64 = 0.8;
const LOW_QUALITY: f64 = 0.6;
const FAST_DELIVERY_DAYS: i64 = 7;

pub struct AggregationReport<B> {
    backend: Arc<B>,
}

impl<B: SourcingBackend> AggregationReport<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

fn analyze(rfq: Option<&Rfq>, offers: &[Offer]) -> Analysis {
    if offers.is_empty() {
        return Analysis {
            message: Some("No offers received".into()),
            ..Analysis::default()
        };
    }

    let count = offers.len() as f64;
    let prices: Vec<f64> = offers.iter().map(|o| o.total_price).collect();
    let min_price = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max_price = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg_price = prices.iter().sum::<f64>() / count;

    let deliveries = offers.iter().map(|o| o.delivery_time);
    let min_delivery = deliveries.clone().min().unwrap_or_default();
    let max_delivery = deliveries.clone().max().unwrap_or_default();
    let avg_delivery = deliveries.map(|d| d as f64).sum::<f64>() / count;

    let scores: Vec<f64> = offers.iter().map(Offer::verification_score).collect();

    let budget_analysis = rfq
        .and_then(|r| r.budget_min.zip(r.budget_max))
        .map(|(low, high)| BudgetAnalysis {
            within_budget_count: prices.iter().filter(|p| (low..=high).contains(*p)).count(),
            below_budget_count: prices.iter().filter(|p| **p < low).count(),
            above_budget_count: prices.iter().filter(|p| **p > high).count(),
        });

    Analysis {
        message: None,
        price_analysis: Some(PriceAnalysis {
            min_price,
            max_price,
            avg_price,
            price_spread: max_price - min_price,
        }),
        delivery_analysis: Some(DeliveryAnalysis {
            min_delivery_time: min_delivery,
            max_delivery_time: max_delivery,
            avg_delivery_time: avg_delivery,
        }),
        quality_analysis: Some(QualityAnalysis {
            avg_verification_score: scores.iter().sum::<f64>() / count,
            high_quality_offers: scores.iter().filter(|s| **s >= HIGH_QUALITY).count(),
            low_quality_offers: scores.iter().filter(|s| **s < LOW_QUALITY).count(),
        }),
        budget_analysis,
    }
}

/// Weighted value score: 40% price, 30% delivery, 30% verification.
fn value_score(offer: &Offer, max_price: f64, max_delivery: i64) -> f64 {
    let price_score = 1.0 - offer.total_price / if max_price > 0.0 { max_price } else { 1.0 };
    let delivery_score = 1.0 - offer.delivery_time as f64 / max_delivery.max(1) as f64;
    price_score * 0.4 + delivery_score * 0.3 + offer.verification_score() * 0.3
}

fn recommend(offers: &[Offer], analysis: &Analysis) -> Vec<String> {
    if offers.is_empty() {
        return vec![
            "Consider expanding supplier search criteria".into(),
            "Review RFQ requirements for clarity".into(),
        ];
    }

    let mut recommendations: Vec<String> = Vec::new();
    if let Some(price) = &analysis.price_analysis {
        if price.price_spread > price.avg_price * 0.5 {
            recommendations.push(
                "Wide price range detected - consider negotiating with mid-range suppliers".into(),
            );
        }
    }
    if let Some(quality) = &analysis.quality_analysis {
        if quality.high_quality_offers > 0 {
            recommendations.push(format!(
                "{} high-quality offers available - prioritize these suppliers",
                quality.high_quality_offers
            ));
        }
    }
    if let Some(delivery) = &analysis.delivery_analysis {
        if delivery.min_delivery_time < FAST_DELIVERY_DAYS {
            recommendations
                .push("Fast delivery options available - consider for urgent requirements".into());
        }
    }
    if let Some(budget) = &analysis.budget_analysis {
        if budget.within_budget_count > 0 {
            recommendations.push(format!("{} offers within budget range", budget.within_budget_count));
        } else if budget.below_budget_count > 0 {
            recommendations.push("Consider suppliers offering below-budget prices".into());
        }
    }

    let max_price = analysis.price_analysis.as_ref().map_or(1.0, |p| p.max_price);
    let max_delivery = analysis.delivery_analysis.as_ref().map_or(1, |d| d.max_delivery_time);
    let best = offers
        .iter()
        .map(|o| (o, value_score(o, max_price, max_delivery)))
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((offer, score)) = best {
        recommendations.push(format!(
            "Best value offer: Supplier {} with score {score:.2}",
            offer.supplier_id.as_deref().unwrap_or("Unknown")
        ));
    }
    recommendations
}

fn comparison_table(offers: &[Offer]) -> Vec<ComparisonRow> {
    let mut rows: Vec<ComparisonRow> = offers
        .iter()
        .map(|o| ComparisonRow {
            supplier_id: o.supplier_id.clone(),
            unit_price: o.unit_price,
            total_price: o.total_price,
            delivery_time: o.delivery_time,
            terms: o.terms.clone(),
            verification_score: o.verification_score(),
            verified: o.verified,
        })
        .collect();
    rows.sort_by(|a, b| a.total_price.total_cmp(&b.total_price));
    rows
}

impl<B: SourcingBackend> AgentWorker for AggregationReport<B> {
    fn name(&self) -> &str {
        names::AGGREGATION_REPORT
    }

    fn description(&self) -> &str {
        "Aggregates verified offers into a comparison report"
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<StageOutput, StageError> {
        let rfq: Option<Rfq> = payload::read(&envelope.payload, keys::RFQ)?;
        let offers: Vec<Offer> = payload::read_or_default(&envelope.payload, keys::VERIFIED_OFFERS)?;
        info!(job_id = %envelope.job_id, offers = offers.len(), "generating report");

        let analysis = analyze(rfq.as_ref(), &offers);
        let recommendations = recommend(&offers, &analysis);
        let report = Report {
            total_offers: offers.len(),
            comparison_table: comparison_table(&offers),
            analysis,
            recommendations,
            rfq,
            generated_at: now_timestamp(),
        };

        if let Some(rfq_id) = payload::rfq_id(&envelope.payload) {
            self.backend.update_rfq_status(&rfq_id, "completed").await?;
        }

        let summary = json!({
            "final_report_generated": true,
            "total_offers": report.total_offers,
            "recommendations": report.recommendations,
        });
        let updates = PayloadUpdates::new()
            .set(keys::FINAL_REPORT, &report)?
            .timestamp(keys::COMPLETED_AT);
        Ok(StageOutput::new(updates.into_map(), summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::LoggingBackend;
    use crate::agents::payload::{Verification, VerificationChecks};

    fn offer(supplier: &str, total_price: f64, delivery_time: i64, score: f64) -> Offer {
        Offer {
            rfq_id: "r1".into(),
            supplier_id: Some(supplier.into()),
            unit_price: total_price / 10.0,
            total_price,
            delivery_time,
            terms: String::new(),
            notes: String::new(),
            status: "submitted".into(),
            submitted_at: String::new(),
            verification: Some(Verification {
                passed: true,
                issues: Vec::new(),
                score,
                checks: VerificationChecks::default(),
            }),
            verified: true,
        }
    }

    #[test]
    fn empty_offers_give_fallback_advice() {
        let analysis = analyze(None, &[]);
        assert_eq!(analysis.message.as_deref(), Some("No offers received"));
        assert_eq!(recommend(&[], &analysis).len(), 2);
    }

    #[test]
    fn analysis_covers_price_delivery_quality_budget() {
        let rfq = Rfq {
            budget_min: Some(150.0),
            budget_max: Some(250.0),
            ..Rfq::default()
        };
        let offers = [
            offer("a", 100.0, 5, 1.0),
            offer("b", 200.0, 10, 0.5),
            offer("c", 300.0, 15, 0.8),
        ];
        let analysis = analyze(Some(&rfq), &offers);

        let price = analysis.price_analysis.as_ref().unwrap();
        assert_eq!((price.min_price, price.max_price, price.avg_price), (100.0, 300.0, 200.0));
        let delivery = analysis.delivery_analysis.as_ref().unwrap();
        assert_eq!((delivery.min_delivery_time, delivery.max_delivery_time), (5, 15));
        let quality = analysis.quality_analysis.as_ref().unwrap();
        assert_eq!((quality.high_quality_offers, quality.low_quality_offers), (2, 1));
        let budget = analysis.budget_analysis.as_ref().unwrap();
        assert_eq!(
            (budget.below_budget_count, budget.within_budget_count, budget.above_budget_count),
            (1, 1, 1)
        );

        let recommendations = recommend(&offers, &analysis);
        assert!(recommendations.iter().any(|r| r.starts_with("Wide price range")));
        assert!(recommendations.iter().any(|r| r.starts_with("Fast delivery")));
        assert!(recommendations.iter().any(|r| r.starts_with("Best value offer: Supplier a")));
    }

    #[test]
    fn comparison_sorted_by_total_price() {
        let rows = comparison_table(&[offer("x", 300.0, 5, 1.0), offer("y", 100.0, 5, 1.0)]);
        assert_eq!(rows[0].supplier_id.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn marks_rfq_completed() {
        let backend = Arc::new(LoggingBackend::new());
        let stage = AggregationReport::new(backend.clone());
        let data = json!({
            "rfq": {"id": "r1", "title": "t"},
            "verified_offers": [offer("a", 100.0, 5, 1.0)],
        })
        .as_object()
        .cloned()
        .unwrap();
        let env = JobEnvelope::new("rfq_process", data, "u");

        let output = stage.process(&env).await.unwrap();
        assert_eq!(backend.rfq_status("r1").as_deref(), Some("completed"));
        let report: Report = payload::read(&output.payload, keys::FINAL_REPORT).unwrap().unwrap();
        assert_eq!(report.total_offers, 1);
        assert_eq!(output.summary["final_report_generated"], json!(true));
    }

    #[tokio::test]
    async fn runs_without_rfq() {
        let stage = AggregationReport::new(Arc::new(LoggingBackend::new()));
        let env = JobEnvelope::new("daily_maintenance", Default::default(), "u");
        let output = stage.process(&env).await.unwrap();
        assert_eq!(output.summary["total_offers"], json!(0));
    }
}
