//! Prompts for CVE triage
//!
//! The prompt is written in Russian to match the keys of the reply contract.
//! Later attempts carry extra CVSS sub-scores so the model has more to work with.

use std::fmt::Write;

use super::error::PromptError;
use crate::model::VulnerabilityRecord;

/// Placeholder rendered for any signal that could not be retrieved
pub const NOT_FOUND: &str = "не найдено";

/// Highest attempt number the template knows how to render
pub const MAX_PROMPT_ATTEMPT: u32 = 3;

/// Patch links included in the prompt
const MAX_PATCH_LINKS: usize = 3;

const ANALYSIS_INSTRUCTIONS: &str = r#"Просьба:
1. Оцени критичность уязвимости с учётом противоречия между CVSS и EPSS
2. Определи приоритетность патча на основе KEV и вектора атаки
3. Предложи конкретные действия для mitigation
4. Укажи на необходимость дополнительных проверок
5. Объясни расхождения между метриками
6. Явно кратко выведи данные, на основе которых делаются выводы: включение в KEV, уровень EPSS, CVSS
7. Перепроверь свои выводы на отсутствие противоречий с исходными данными"#;

const OUTPUT_CONTRACT: &str = r#"Ответ предоставь В ВИДЕ ВАЛИДНОГО JSON БЕЗ КОММЕНТАРИЕВ. Пример:
{"CVE": "CVE-2024-XXXX", "Решение": "игнорировать", "Обоснование": "...", "Патч": "ссылка"}
Допустимые дополнительные поля: "Приоритет", "Проверки", "Меры", "Расхождения".
Если патча нет, укажи null."#;

/// Build the triage prompt for the given attempt (1..=3)
///
/// Attempt 2 adds the CVSS impact sub-score line, attempt 3 also adds the
/// exploitability sub-score line. Everything else is identical across attempts.
pub fn build_prompt(record: &VulnerabilityRecord, attempt: u32) -> Result<String, PromptError> {
    if !(1..=MAX_PROMPT_ATTEMPT).contains(&attempt) {
        return Err(PromptError::InvalidAttempt(attempt));
    }

    let cvss = record.cvss.as_ref();
    let mut prompt = String::new();

    writeln!(
        prompt,
        "Проанализируй уязвимость {} на основе следующих данных:",
        record.cve_id
    )?;
    writeln!(prompt)?;

    // Section 1: scoring signals
    writeln!(prompt, "1. Базовые характеристики:")?;
    writeln!(
        prompt,
        "   - Включение в KEV: {}",
        if record.kev_status { "Да" } else { "Нет" }
    )?;

    match &record.epss {
        Some(epss) => writeln!(prompt, "   - Уровень EPSS: {:.2}%", epss.as_percentage())?,
        None => writeln!(prompt, "   - Уровень EPSS: {}", NOT_FOUND)?,
    }

    match cvss {
        Some(cvss) => writeln!(
            prompt,
            "   - Уровень CVSS{}: {:.1} ({})",
            cvss.version
                .map(|v| format!(" v{}", v))
                .unwrap_or_default(),
            cvss.base_score,
            cvss.severity
                .map(|s| s.to_string())
                .unwrap_or_else(|| NOT_FOUND.to_string())
        )?,
        None => writeln!(prompt, "   - Уровень CVSS: {}", NOT_FOUND)?,
    }

    writeln!(
        prompt,
        "   - Вектор CVSS: {}",
        cvss.and_then(|c| c.vector.as_deref()).unwrap_or(NOT_FOUND)
    )?;

    if attempt >= 2 {
        writeln!(
            prompt,
            "   - Оценка влияния (Impact): {}",
            format_sub_score(cvss.and_then(|c| c.impact_score))
        )?;
    }
    if attempt >= 3 {
        writeln!(
            prompt,
            "   - Оценка эксплуатируемости (Exploitability): {}",
            format_sub_score(cvss.and_then(|c| c.exploitability_score))
        )?;
    }
    writeln!(prompt)?;

    // Section 2: description
    writeln!(prompt, "2. Описание уязвимости:")?;
    writeln!(
        prompt,
        "   {}",
        record.description.as_deref().unwrap_or(NOT_FOUND)
    )?;
    writeln!(prompt)?;

    // Section 3: technical details
    let cwe = if record.cwe.is_empty() {
        NOT_FOUND.to_string()
    } else {
        record.cwe.iter().cloned().collect::<Vec<_>>().join(", ")
    };

    writeln!(prompt, "3. Критические технические детали:")?;
    writeln!(prompt, "   - CWE: {}", cwe)?;
    writeln!(
        prompt,
        "   - Затронутые продукты: {}",
        record
            .affected_products
            .first()
            .map(String::as_str)
            .unwrap_or(NOT_FOUND)
    )?;
    match record.published {
        Some(published) => writeln!(
            prompt,
            "   - Дата публикации: {}",
            published.format("%Y-%m-%d")
        )?,
        None => writeln!(prompt, "   - Дата публикации: {}", NOT_FOUND)?,
    }
    writeln!(prompt)?;

    // Section 4: patches
    writeln!(prompt, "4. Ссылки на патчи:")?;
    if record.patch_candidates.is_empty() {
        writeln!(prompt, "   {}", NOT_FOUND)?;
    } else {
        for patch in record.patch_candidates.iter().take(MAX_PATCH_LINKS) {
            writeln!(prompt, "   - {}: {}", patch.repository, patch.commit_url)?;
        }
    }
    writeln!(prompt)?;

    writeln!(prompt, "{}", ANALYSIS_INSTRUCTIONS)?;
    writeln!(prompt)?;
    write!(prompt, "{}", OUTPUT_CONTRACT)?;

    Ok(prompt)
}

fn format_sub_score(score: Option<f64>) -> String {
    score
        .map(|s| format!("{:.1}", s))
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::reply::REQUIRED_KEYS;
    use crate::model::{
        CveId, CvssMetrics, CvssSource, CvssVersion, EpssScore, PatchCandidate, Severity,
    };
    use chrono::{TimeZone, Utc};
    use url::Url;

    fn empty_record() -> VulnerabilityRecord {
        VulnerabilityRecord::empty("CVE-2024-0001".parse::<CveId>().unwrap())
    }

    fn full_record() -> VulnerabilityRecord {
        let mut record = VulnerabilityRecord::empty("CVE-2021-44228".parse().unwrap());
        record.kev_status = true;
        record.epss = Some(EpssScore {
            probability: 0.94358,
            percentile: Some(0.99999),
            date: None,
        });
        record.cvss = Some(CvssMetrics {
            version: Some(CvssVersion::V31),
            base_score: 10.0,
            severity: Some(Severity::Critical),
            vector: Some("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:H/A:H".to_string()),
            impact_score: Some(6.0),
            exploitability_score: Some(3.9),
            source: CvssSource::Nvd,
        });
        record.description = Some("Apache Log4j2 JNDI features do not protect against attacker controlled LDAP".to_string());
        record.cwe = ["CWE-502".to_string(), "CWE-400".to_string()].into();
        record.affected_products = vec!["cpe:2.3:a:apache:log4j:*:*:*:*:*:*:*:*".to_string()];
        record.published = Some(Utc.with_ymd_and_hms(2021, 12, 10, 10, 15, 9).unwrap());
        record.patch_candidates = (0..5)
            .map(|i| PatchCandidate {
                repository: format!("org/repo{}", i),
                commit_url: Url::parse(&format!("https://github.com/org/repo{}/commit/abcdef{}", i, i)).unwrap(),
                commit_message: "fix".to_string(),
            })
            .collect();
        record
    }

    /// `smaller` lines appear in `larger` in order, with `extra` lines left over
    fn assert_line_superset(smaller: &str, larger: &str, extra: usize) {
        let small: Vec<&str> = smaller.lines().collect();
        let large: Vec<&str> = larger.lines().collect();
        assert_eq!(large.len(), small.len() + extra);

        let mut it = large.iter();
        for line in &small {
            assert!(it.any(|l| l == line), "missing line: {}", line);
        }
    }

    #[test]
    fn test_all_sources_missing_renders_markers() {
        let prompt = build_prompt(&empty_record(), 1).unwrap();

        assert!(prompt.starts_with("Проанализируй уязвимость CVE-2024-0001"));
        assert!(prompt.contains("Включение в KEV: Нет"));
        assert!(prompt.contains(&format!("Уровень EPSS: {}", NOT_FOUND)));
        assert!(prompt.contains(&format!("Уровень CVSS: {}", NOT_FOUND)));
        assert!(prompt.contains(&format!("CWE: {}", NOT_FOUND)));
        assert!(prompt.contains(&format!("Затронутые продукты: {}", NOT_FOUND)));
        assert!(prompt.contains(&format!("Дата публикации: {}", NOT_FOUND)));
        assert!(prompt.ends_with("Если патча нет, укажи null."));
    }

    #[test]
    fn test_full_record() {
        let prompt = build_prompt(&full_record(), 1).unwrap();

        assert!(prompt.contains("Включение в KEV: Да"));
        assert!(prompt.contains("Уровень EPSS: 94.36%"));
        assert!(prompt.contains("Уровень CVSS v3.1: 10.0 (CRITICAL)"));
        assert!(prompt.contains("CWE: CWE-400, CWE-502"));
        assert!(prompt.contains("Дата публикации: 2021-12-10"));
        assert!(!prompt.contains("Оценка влияния"));

        // Only the first three patches are listed
        assert!(prompt.contains("org/repo2: https://github.com/org/repo2/commit/abcdef2"));
        assert!(!prompt.contains("org/repo3"));
    }

    #[test]
    fn test_unversioned_cvss_omits_version() {
        let mut record = empty_record();
        record.cvss = Some(CvssMetrics {
            version: None,
            base_score: 7.8,
            severity: Some(Severity::High),
            vector: None,
            impact_score: None,
            exploitability_score: None,
            source: CvssSource::RedHat,
        });

        let prompt = build_prompt(&record, 1).unwrap();
        assert!(prompt.contains("Уровень CVSS: 7.8 (HIGH)"));
        assert!(!prompt.contains("CVSS v"));
        assert!(prompt.contains(&format!("Вектор CVSS: {}", NOT_FOUND)));
    }

    #[test]
    fn test_attempts_add_one_metric_line_each() {
        for record in [full_record(), empty_record()] {
            let first = build_prompt(&record, 1).unwrap();
            let second = build_prompt(&record, 2).unwrap();
            let third = build_prompt(&record, 3).unwrap();

            assert_line_superset(&first, &second, 1);
            assert_line_superset(&second, &third, 1);
        }

        let third = build_prompt(&full_record(), 3).unwrap();
        assert!(third.contains("Оценка влияния (Impact): 6.0"));
        assert!(third.contains("Оценка эксплуатируемости (Exploitability): 3.9"));

        let third = build_prompt(&empty_record(), 3).unwrap();
        assert!(third.contains(&format!("Оценка влияния (Impact): {}", NOT_FOUND)));
    }

    #[test]
    fn test_empty_patches_render_marker() {
        let prompt = build_prompt(&empty_record(), 1).unwrap();
        let section = prompt
            .split("4. Ссылки на патчи:\n")
            .nth(1)
            .unwrap();
        assert!(section.starts_with(&format!("   {}\n", NOT_FOUND)));
    }

    #[test]
    fn test_deterministic() {
        let record = full_record();
        assert_eq!(
            build_prompt(&record, 2).unwrap(),
            build_prompt(&record, 2).unwrap()
        );
    }

    #[test]
    fn test_invalid_attempt() {
        assert!(matches!(
            build_prompt(&empty_record(), 0),
            Err(PromptError::InvalidAttempt(0))
        ));
        assert!(matches!(
            build_prompt(&empty_record(), 4),
            Err(PromptError::InvalidAttempt(4))
        ));
    }

    #[test]
    fn test_contract_names_required_keys() {
        for key in REQUIRED_KEYS {
            assert!(OUTPUT_CONTRACT.contains(&format!("\"{}\"", key)));
        }
        assert_eq!(
            ANALYSIS_INSTRUCTIONS.lines().filter(|l| l.starts_with(char::is_numeric)).count(),
            7
        );
    }
}
