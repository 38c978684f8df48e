/// 14-digit establishment identifier (SIRET).
/// Example: `50113813700013`
pub type Siret = String;
/// 9-digit legal-entity identifier (SIREN); the first nine digits of a SIRET.
/// Example: `501138137`
pub type Siren = String;
/// Stable input-row identifier used for checkpointing and export.
/// Examples: `AUX-001`, `42`
pub type InputId = String;
/// 2-character department prefix of a domestic 5-digit postal code.
/// Examples: `69`, `75`, `97`
pub type Department = String;
