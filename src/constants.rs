/// Constants used by input field-name aliasing.
pub mod input {
    /// Identifier aliases, in priority order (first non-empty wins).
    pub const ID_ALIASES: &[&str] = &["Auxiliaire", "Code tiers", "index"];
    /// Company-name aliases.
    pub const NAME_ALIASES: &[&str] = &["Nom", "Name", "Company Name", "Raison Sociale"];
    /// National establishment identifier aliases (14 digits).
    pub const SIRET_ALIASES: &[&str] = &["Code SIRET"];
    /// Legal-entity identifier aliases (9 digits).
    pub const SIREN_ALIASES: &[&str] = &["Code SIREN"];
    /// VAT-like identifier aliases; never a direct-lookup trigger.
    pub const NIF_ALIASES: &[&str] = &["Code NIF"];
    /// Address-line aliases, concatenated in order.
    pub const ADDRESS_ALIASES: &[&str] = &["Adresse 1", "Adresse 2", "Adresse 3"];
    /// Postal-code aliases.
    pub const POSTAL_ALIASES: &[&str] = &["Postal", "Code Postal", "CP", "ZIP"];
    /// City aliases.
    pub const CITY_ALIASES: &[&str] = &["Ville", "City", "Commune"];
    /// Synthetic field injected by readers so every row has an identifier.
    pub const INDEX_FIELD: &str = "index";
}

/// Constants used by name normalization.
pub mod normalizer {
    /// Legal-form suffixes removed from company names at token boundaries.
    pub const LEGAL_SUFFIXES: &[&str] = &[
        "SASU",
        "SAS",
        "SARL",
        "EURL",
        "SA",
        "SCI",
        "SNC",
        "SC",
        "SCA",
        "SCOP",
        "SELARL",
        "SELAFA",
        "GIE",
        "ASSOCIATION",
    ];
    /// Generic tokens the model is told to skip when picking the search token.
    pub const GENERIC_TOKENS: &[&str] = &["MARKET", "FRANCE", "GROUPE", "COMPAGNIE", "SOCIETE"];
    /// Minimum length for a token to count as distinctive in the heuristic.
    pub const MIN_DISTINCTIVE_TOKEN_LEN: usize = 4;
    /// Postal code rejected as implausible.
    pub const IMPLAUSIBLE_POSTAL: &str = "00000";
    /// Default per-worker normalization cache capacity.
    pub const DEFAULT_CACHE_CAPACITY: usize = 4096;
}

/// Constants used by the matching cascade and candidate scoring.
pub mod cascade {
    /// Score contribution when name token-sort similarity clears its threshold.
    pub const NAME_WEIGHT: u32 = 40;
    /// Score contribution for an exact upper-cased city match.
    pub const CITY_WEIGHT: u32 = 30;
    /// Score contribution when address token-set similarity clears its threshold.
    pub const ADDRESS_WEIGHT: u32 = 20;
    /// Score contribution for head-office establishments.
    pub const HEAD_OFFICE_WEIGHT: u32 = 10;
    /// Name token-sort similarity threshold.
    pub const NAME_SIM_THRESHOLD: f64 = 0.9;
    /// Address token-set similarity threshold.
    pub const ADDRESS_SIM_THRESHOLD: f64 = 0.8;
    /// Scores below this floor are treated as no match.
    pub const SCORE_FLOOR: u32 = 50;
    /// Scores at or above this resolve without arbitration when the margin is clear.
    pub const SCORE_CONFIDENT: u32 = 80;
    /// Top-two margin at or below which the arbiter is consulted.
    pub const CLOSE_MARGIN: u32 = 2;
    /// Default number of full-text candidates retrieved.
    pub const FTS_LIMIT: usize = 20;
    /// Maximum number of alternatives kept on a result.
    pub const MAX_ALTERNATIVES: usize = 5;
    /// Maximum name edit distance accepted by the strict local lookup.
    pub const STRICT_NAME_MAX_DISTANCE: usize = 3;
    /// City edit distances at or above this drop a candidate in the secondary filter.
    pub const CITY_FILTER_DISTANCE: usize = 3;
    /// Address edit distances at or above this drop a candidate in the secondary filter.
    pub const ADDRESS_FILTER_DISTANCE: usize = 10;
    /// Confidence assigned to direct identifier matches.
    pub const CONFIDENCE_DIRECT: f64 = 1.0;
    /// Confidence assigned to single strict-local hits.
    pub const CONFIDENCE_STRICT_LOCAL: f64 = 0.95;
}

/// Constants naming registry columns and layout.
pub mod registry {
    /// Establishment identifier column.
    pub const COL_SIRET: &str = "siret";
    /// Legal-entity identifier column.
    pub const COL_SIREN: &str = "siren";
    /// Establishment administrative-state column.
    pub const COL_ETAT: &str = "etatAdministratifEtablissement";
    /// Administrative-state value marking an active establishment.
    pub const ACTIVE_SENTINEL: &str = "A";
    /// Establishment postal-code column.
    pub const COL_POSTAL: &str = "codePostalEtablissement";
    /// Establishment city column.
    pub const COL_CITY: &str = "libelleCommuneEtablissement";
    /// Head-office flag column in the raw establishment file.
    pub const COL_SIEGE: &str = "etablissementSiege";
    /// Precomputed concatenated address column in partition files.
    pub const COL_ADDRESS: &str = "address";
    /// Precomputed head-office flag column in partition files.
    pub const COL_IS_SIEGE: &str = "is_siege";
    /// Raw address-part columns concatenated into the display address.
    pub const ADDRESS_PART_COLS: &[&str] = &[
        "numeroVoieEtablissement",
        "typeVoieEtablissement",
        "libelleVoieEtablissement",
        "complementAdresseEtablissement",
        "distributionSpecialeEtablissement",
    ];
    /// Directory-name prefix for department partitions (`dept=NN`).
    pub const PARTITION_DIR_PREFIX: &str = "dept=";
    /// Name-index field storing the legal-entity identifier.
    pub const INDEX_FIELD_SIREN: &str = "siren";
    /// Name-index field storing the official legal-entity name.
    pub const INDEX_FIELD_NAME: &str = "name";
    /// Tantivy writer heap budget used when building the name index.
    pub const INDEX_WRITER_BUDGET: usize = 50_000_000;
    /// Maximum transient-read retries before a record-level error.
    pub const READ_RETRY_LIMIT: u32 = 3;
    /// Base backoff delay between transient-read retries, in milliseconds.
    pub const READ_RETRY_BASE_DELAY_MS: u64 = 100;
}

/// Constants used by checkpoint persistence and wire encoding.
pub mod checkpoint {
    /// Key prefix for per-input result rows.
    pub const RESULT_KEY_PREFIX: &[u8] = b"result:";
    /// Key holding the list of all known input identifiers.
    pub const IDS_KEY: &[u8] = b"__ids__";
    /// Key holding the list of identifiers whose latest row is an error.
    pub const ERROR_IDS_KEY: &[u8] = b"__error_ids__";
    /// Key used for checkpoint-store global metadata.
    pub const META_KEY: &[u8] = b"__meta__";
    /// Version tag for checkpoint-store metadata compatibility checks.
    pub const STORE_VERSION: u8 = 1;
    /// Version tag for persisted result rows.
    pub const ROW_RECORD_VERSION: u8 = 1;
    /// Chunk size for batched checkpoint reads.
    pub const READ_BATCH: usize = 256;
    /// Default filename when the checkpoint path is a directory.
    pub const DEFAULT_STORE_FILENAME: &str = "resolution_state.bin";
}

/// Constants used by result export.
pub mod export {
    /// Stable export column order.
    pub const COLUMNS: &[&str] = &[
        "input_id",
        "resolved_id",
        "official_name",
        "confidence",
        "method",
        "alternatives",
        "error",
    ];
}

/// Constants used by the LLM adapter.
pub mod llm {
    /// Environment variable holding the Gemini API credential.
    pub const ENV_API_KEY: &str = "GEMINI_API_KEY";
    /// Default Gemini model identifier.
    pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
    /// Gemini generateContent endpoint root.
    pub const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
    /// Default client-level timeout for adapter calls, in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
}
