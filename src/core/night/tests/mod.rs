mod plan_parsing;
