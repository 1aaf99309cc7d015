//! Fixed instructions for the repair and rewrite calls, plus the privacy policy block.

pub const CONTRACT_REPAIR_SYSTEM_INSTRUCTION: &str = "Du bist ein strenger Formatprüfer. \
Du antwortest ausschließlich mit einem einzigen JSON-Objekt ohne Markdown und ohne Erklärungen.";

pub const PRIVACY_REWRITE_SYSTEM_INSTRUCTION: &str = "Du bist ein Datenschutz-Lektor für \
Unterrichtsmaterialien. Du formulierst Prompts so um, dass sie keine personenbezogenen Daten \
von Schülerinnen und Schülern abfragen, und antwortest ausschließlich mit JSON.";

pub const PRIVACY_POLICY_HEADER: &str = "Datenschutz-Anforderungen:";

/// Every line carries a negation or a placeholder, so the block never reads as risky.
pub const PRIVACY_POLICY_BLOCK: &str = "Datenschutz-Anforderungen:
- Frage keine personenbezogenen Daten ab und verarbeite keine echten Namen, Adressen oder Kontaktdaten.
- Verwende ausschließlich Platzhalter wie [VORNAME], [KLASSE] oder [SCHULE].
- Erfrage keine Gesundheitsdaten, Diagnosen, Geburtsdaten oder Ausweisnummern.";

const MAX_ECHOED_OUTPUT_CHARS: usize = 4_000;

pub fn contract_repair_prompt(original_prompt: &str, previous_output: &str) -> String {
    format!(
        "Die folgende Antwort erfüllt nicht das geforderte Format.\n\n\
         Ursprüngliche Aufgabe:\n{original_prompt}\n\n\
         Bisherige Antwort:\n{previous}\n\n\
         Gib ausschließlich striktes JSON der Form {{\"handoff_prompt\": \"...\"}} zurück. \
         Der Wert von handoff_prompt muss mit \"Du bist\" beginnen, mindestens 40 Zeichen lang \
         sein und den vollständigen Prompt enthalten. Keine Code-Blöcke, kein weiterer Text.",
        original_prompt = original_prompt.trim(),
        previous = excerpt(previous_output),
    )
}

pub fn privacy_rewrite_prompt(handoff_prompt: &str) -> String {
    format!(
        "Formuliere den folgenden Prompt inhaltlich unverändert neu. Ersetze jede Aufforderung, \
         personenbezogene Daten zu nennen oder abzufragen (Namen, Adressen, Geburtsdaten, \
         Telefonnummern, E-Mail-Adressen, Ausweisnummern, Gesundheitsdaten), durch Platzhalter \
         wie [VORNAME] oder [KLASSE].\n\n\
         Prompt:\n{prompt}\n\n\
         Gib ausschließlich striktes JSON der Form {{\"handoff_prompt\": \"...\"}} zurück. \
         Der Wert muss mit \"Du bist\" beginnen.",
        prompt = handoff_prompt.trim(),
    )
}

fn excerpt(text: &str) -> String {
    text.trim().chars().take(MAX_ECHOED_OUTPUT_CHARS).collect()
}
