diesel::table! {
    repositories (repo_id) {
        repo_id -> BigInt,
        address -> Text,
        name -> Jsonb,
        icon -> Jsonb,
        description -> Jsonb,
        web_base_url -> Nullable<Text>,
        timestamp -> BigInt,
        version -> Nullable<BigInt>,
        format_version -> Nullable<Text>,
        max_age -> Nullable<Integer>,
        certificate -> Nullable<Text>,
    }
}

diesel::table! {
    repository_preferences (repo_id) {
        repo_id -> BigInt,
        weight -> Integer,
        enabled -> Bool,
        last_updated -> Nullable<BigInt>,
        user_mirrors -> Nullable<Jsonb>,
        disabled_mirrors -> Nullable<Jsonb>,
        username -> Nullable<Text>,
        password -> Nullable<Text>,
    }
}

diesel::table! {
    mirrors (repo_id, url) {
        repo_id -> BigInt,
        url -> Text,
        country_code -> Nullable<Text>,
        is_ipfs_gateway -> Bool,
        works_without_sni -> Bool,
    }
}

diesel::table! {
    anti_features (repo_id, id) {
        repo_id -> BigInt,
        id -> Text,
        icon -> Jsonb,
        name -> Jsonb,
        description -> Jsonb,
    }
}

diesel::table! {
    categories (repo_id, id) {
        repo_id -> BigInt,
        id -> Text,
        icon -> Jsonb,
        name -> Jsonb,
        description -> Jsonb,
    }
}

diesel::table! {
    release_channels (repo_id, id) {
        repo_id -> BigInt,
        id -> Text,
        name -> Jsonb,
        description -> Jsonb,
    }
}

diesel::table! {
    apps (repo_id, package_name) {
        repo_id -> BigInt,
        package_name -> Text,
        metadata -> Jsonb,
        added -> BigInt,
        last_updated -> BigInt,
        local_name -> Nullable<Text>,
        local_summary -> Nullable<Text>,
        is_compatible -> Bool,
    }
}

diesel::table! {
    localized_files (repo_id, package_name, file_type, locale) {
        repo_id -> BigInt,
        package_name -> Text,
        file_type -> Text,
        locale -> Text,
        name -> Text,
        sha256 -> Nullable<Text>,
        size -> Nullable<BigInt>,
        ipfs_cid_v1 -> Nullable<Text>,
    }
}

diesel::table! {
    localized_file_lists (repo_id, package_name, file_type, locale, name) {
        repo_id -> BigInt,
        package_name -> Text,
        file_type -> Text,
        locale -> Text,
        name -> Text,
        sha256 -> Nullable<Text>,
        size -> Nullable<BigInt>,
        ipfs_cid_v1 -> Nullable<Text>,
    }
}

diesel::table! {
    versions (repo_id, package_name, version_id) {
        repo_id -> BigInt,
        package_name -> Text,
        version_id -> Text,
        version_code -> BigInt,
        version_name -> Text,
        added -> BigInt,
        min_sdk -> Nullable<Integer>,
        max_sdk -> Nullable<Integer>,
        is_compatible -> Bool,
        data -> Jsonb,
    }
}

diesel::joinable!(repository_preferences -> repositories (repo_id));
diesel::joinable!(mirrors -> repositories (repo_id));
diesel::joinable!(anti_features -> repositories (repo_id));
diesel::joinable!(categories -> repositories (repo_id));
diesel::joinable!(release_channels -> repositories (repo_id));
diesel::joinable!(apps -> repositories (repo_id));

diesel::allow_tables_to_appear_in_same_query!(
    repositories,
    repository_preferences,
    mirrors,
    anti_features,
    categories,
    release_channels,
    apps,
    localized_files,
    localized_file_lists,
    versions,
);
