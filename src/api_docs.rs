// src/api_docs.rs
//! Static, machine-readable description of the HTTP contract served at `GET /help`.

use serde_json::{json, Value};

pub fn api_docs() -> Value {
    json!({
        "api_version": "1.0",
        "description": "DOGA (Diario Oficial de Galicia) Analysis Service API",
        "endpoints": {
            "/analyze-text": {
                "method": "POST",
                "description": "Analyzes multiple text queries against the latest DOGA content in parallel",
                "request": {
                    "content_type": "application/json",
                    "body": {
                        "texts": {
                            "type": "array",
                            "description": "Array of text prompts to analyze",
                            "required": true,
                            "example": [
                                "Find all resolutions about public employment",
                                "List announcements about environmental grants",
                                "Show orders related to education"
                            ]
                        },
                        "metadata": {
                            "type": "object",
                            "required": false,
                            "description": "Caller ids echoed back in the response; other keys are copied into every result",
                            "properties": {
                                "user_id": "Caller user id",
                                "subscription_id": "Caller subscription id"
                            }
                        },
                        "limit": {
                            "type": "number",
                            "required": false,
                            "default": 5,
                            "description": "Maximum matches per prompt; 0 or less means unlimited"
                        },
                        "date": {
                            "type": "string",
                            "required": false,
                            "format": "YYYY-MM-DD",
                            "description": "Query date reported back; defaults to today"
                        }
                    }
                },
                "response": {
                    "content_type": "application/json",
                    "structure": {
                        "query_date": {
                            "type": "string",
                            "format": "YYYY-MM-DD",
                            "description": "Date when the query was processed"
                        },
                        "doga_info": {
                            "type": "object",
                            "description": "Information about the DOGA issue being analyzed",
                            "properties": {
                                "issue_number": "DOGA issue number (empty when the feed does not state it)",
                                "publication_date": "Publication date",
                                "source_url": "URL of the DOGA feed"
                            }
                        },
                        "results": {
                            "type": "array",
                            "description": "Analysis results for each prompt, in request order",
                            "items": {
                                "prompt": "Original search query",
                                "matches": {
                                    "type": "array",
                                    "items": {
                                        "document_type": "Type of document (ORDER, RESOLUTION, ANNOUNCEMENT, etc.)",
                                        "issuing_body": "Organization that issued the document",
                                        "title": "Complete document title",
                                        "summary": "Brief content summary",
                                        "content": "Main subject matter",
                                        "publication_date": "Publication date in DOGA",
                                        "relevance_score": "Match relevance (0-1)",
                                        "source_url": "Direct link to the document",
                                        "source": "Always DOGA",
                                        "metadata": {
                                            "category": "Main document category",
                                            "subcategory": "Document subcategory",
                                            "procedure_code": "Official procedure code if available"
                                        }
                                    }
                                },
                                "metadata": {
                                    "match_count": "Number of matches returned",
                                    "max_relevance": "Highest relevance score",
                                    "user_id": "Caller user id",
                                    "subscription_id": "Caller subscription id",
                                    "error": "Present when this prompt could not be analysed"
                                }
                            }
                        },
                        "metadata": {
                            "type": "object",
                            "description": "Query execution metadata",
                            "properties": {
                                "user_id": "Caller user id",
                                "subscription_id": "Caller subscription id",
                                "total_items_processed": "Number of DOGA items analyzed",
                                "processing_time_ms": "Total processing time in milliseconds"
                            }
                        }
                    }
                },
                "errors": {
                    "400": {
                        "description": "Bad Request - Invalid input",
                        "example": { "error": "Array of text prompts is required" }
                    },
                    "500": {
                        "description": "Internal Server Error (for example the DOGA feed could not be fetched)",
                        "example": {
                            "error": "failed to fetch feed from https://www.xunta.gal/diario-oficial-galicia/rss/Sumario_es.rss: connection refused",
                            "status": "error",
                            "timestamp": "2025-01-16T10:00:00+00:00"
                        }
                    }
                }
            },
            "/help": {
                "method": "GET",
                "description": "Returns API documentation and usage information",
                "response": {
                    "content_type": "application/json",
                    "description": "This documentation"
                }
            },
            "/health": {
                "method": "GET",
                "description": "Liveness probe, returns OK"
            }
        }
    })
}
